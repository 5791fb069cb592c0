use otcd_core::{
    AccountState, ChainId, Deal, DealEvent, DealId, EscrowDeposit, Lease, OtcError, QueueItem,
    Side, Stage,
};
use std::path::Path;

/// Persistent state database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   deals              — dealId bytes                          → bincode(Deal)
///   deals_by_stage     — stage byte || dealId bytes             → [] (membership set)
///   deposits           — dealId || txid || outputIndex          → bincode(EscrowDeposit)
///   queue_items        — dealId || sourceAddress || seq (be)    → bincode(QueueItem)
///   queue_item_index   — itemId utf8 bytes                      → composite queue_items key
///   account_states     — chain utf8 || 0x00 || address utf8     → bincode(AccountState)
///   leases             — dealId bytes                           → bincode(Lease)
///   events             — dealId || seq (be u64)                 → bincode(DealEvent)
///   meta               — utf8 key bytes                         → raw bytes
pub struct StateDb {
    _db: sled::Db,
    deals: sled::Tree,
    deals_by_stage: sled::Tree,
    deposits: sled::Tree,
    queue_items: sled::Tree,
    queue_item_index: sled::Tree,
    account_states: sled::Tree,
    leases: sled::Tree,
    events: sled::Tree,
    meta: sled::Tree,
}

fn stage_byte(stage: Stage) -> u8 {
    match stage {
        Stage::Created => 0,
        Stage::Collection => 1,
        Stage::Waiting => 2,
        Stage::Swap => 3,
        Stage::Closed => 4,
        Stage::Reverted => 5,
    }
}

fn account_state_key(chain: &ChainId, address: &str) -> Vec<u8> {
    let mut key = chain.as_str().as_bytes().to_vec();
    key.push(0u8);
    key.extend_from_slice(address.as_bytes());
    key
}

fn deposit_key(deal_id: DealId, txid: &str, output_index: Option<u32>) -> Vec<u8> {
    let mut key = deal_id.as_bytes().to_vec();
    key.extend_from_slice(txid.as_bytes());
    key.push(0u8);
    key.extend_from_slice(&output_index.unwrap_or(u32::MAX).to_be_bytes());
    key
}

fn queue_item_key(deal_id: DealId, source_address: &str, seq: u64) -> Vec<u8> {
    let mut key = deal_id.as_bytes().to_vec();
    key.push(0u8);
    key.extend_from_slice(source_address.as_bytes());
    key.push(0u8);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

impl StateDb {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OtcError> {
        let db = sled::open(path).map_err(|e| OtcError::Storage(e.to_string()))?;
        let deals = db
            .open_tree("deals")
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        let deals_by_stage = db
            .open_tree("deals_by_stage")
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        let deposits = db
            .open_tree("deposits")
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        let queue_items = db
            .open_tree("queue_items")
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        let queue_item_index = db
            .open_tree("queue_item_index")
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        let account_states = db
            .open_tree("account_states")
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        let leases = db
            .open_tree("leases")
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        let events = db
            .open_tree("events")
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        let meta = db
            .open_tree("meta")
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(Self {
            _db: db,
            deals,
            deals_by_stage,
            deposits,
            queue_items,
            queue_item_index,
            account_states,
            leases,
            events,
            meta,
        })
    }

    pub fn flush(&self) -> Result<(), OtcError> {
        self._db.flush().map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(())
    }

    // ── Deals ─────────────────────────────────────────────────────────────────

    pub fn get_deal(&self, id: DealId) -> Result<Option<Deal>, OtcError> {
        match self
            .deals
            .get(id.as_bytes())
            .map_err(|e| OtcError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persists the deal row and keeps the `deals_by_stage` index in sync.
    /// `prior_stage` must be passed when the stage changed so the old index
    /// entry is removed — callers get this for free since they hold the
    /// deal before mutating it.
    pub fn put_deal(&self, deal: &Deal, prior_stage: Option<Stage>) -> Result<(), OtcError> {
        let bytes = bincode::serialize(deal)?;
        self.deals
            .insert(deal.id.as_bytes(), bytes)
            .map_err(|e| OtcError::Storage(e.to_string()))?;

        if let Some(prior) = prior_stage {
            if prior != deal.stage {
                let mut old_key = vec![stage_byte(prior)];
                old_key.extend_from_slice(deal.id.as_bytes());
                self.deals_by_stage
                    .remove(old_key)
                    .map_err(|e| OtcError::Storage(e.to_string()))?;
            }
        }
        let mut new_key = vec![stage_byte(deal.stage)];
        new_key.extend_from_slice(deal.id.as_bytes());
        self.deals_by_stage
            .insert(new_key, b"".as_ref())
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn iter_deals_in_stage(&self, stage: Stage) -> Result<Vec<DealId>, OtcError> {
        let prefix = [stage_byte(stage)];
        let mut out = Vec::new();
        for item in self.deals_by_stage.scan_prefix(prefix) {
            let (key, _) = item.map_err(|e| OtcError::Storage(e.to_string()))?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(&key[1..17]);
            out.push(DealId::from_bytes(arr));
        }
        Ok(out)
    }

    /// Non-terminal deals: CREATED, COLLECTION, WAITING, SWAP. The tick
    /// loop fetches this bounded batch each cycle.
    pub fn iter_active_deals(&self) -> Result<Vec<DealId>, OtcError> {
        let mut out = Vec::new();
        for stage in [Stage::Created, Stage::Collection, Stage::Waiting, Stage::Swap] {
            out.extend(self.iter_deals_in_stage(stage)?);
        }
        Ok(out)
    }

    pub fn count_deals(&self) -> u64 {
        self.deals.len() as u64
    }

    // ── Deposits ──────────────────────────────────────────────────────────────

    pub fn put_deposit(&self, deposit: &EscrowDeposit) -> Result<(), OtcError> {
        let key = deposit_key(deposit.deal_id, &deposit.txid, deposit.output_index);
        let bytes = bincode::serialize(deposit)?;
        self.deposits
            .insert(key, bytes)
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn remove_deposit(
        &self,
        deal_id: DealId,
        txid: &str,
        output_index: Option<u32>,
    ) -> Result<(), OtcError> {
        let key = deposit_key(deal_id, txid, output_index);
        self.deposits
            .remove(key)
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn iter_deposits_for_deal(&self, deal_id: DealId) -> Result<Vec<EscrowDeposit>, OtcError> {
        let mut out = Vec::new();
        for item in self.deposits.scan_prefix(deal_id.as_bytes()) {
            let (_, bytes) = item.map_err(|e| OtcError::Storage(e.to_string()))?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    pub fn iter_deposits_for_side(
        &self,
        deal_id: DealId,
        side: Side,
    ) -> Result<Vec<EscrowDeposit>, OtcError> {
        Ok(self
            .iter_deposits_for_deal(deal_id)?
            .into_iter()
            .filter(|d| d.side == side)
            .collect())
    }

    // ── Queue items ───────────────────────────────────────────────────────────

    pub fn put_queue_item(&self, item: &QueueItem) -> Result<(), OtcError> {
        let key = queue_item_key(item.deal_id, &item.source_address, item.seq);
        let bytes = bincode::serialize(item)?;
        self.queue_items
            .insert(&key, bytes)
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        self.queue_item_index
            .insert(item.id.as_bytes(), key)
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn get_queue_item(&self, id: &str) -> Result<Option<QueueItem>, OtcError> {
        let key = match self
            .queue_item_index
            .get(id.as_bytes())
            .map_err(|e| OtcError::Storage(e.to_string()))?
        {
            Some(k) => k,
            None => return Ok(None),
        };
        match self
            .queue_items
            .get(&key)
            .map_err(|e| OtcError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn iter_queue_items_for_deal(&self, deal_id: DealId) -> Result<Vec<QueueItem>, OtcError> {
        let mut out = Vec::new();
        for item in self.queue_items.scan_prefix(deal_id.as_bytes()) {
            let (_, bytes) = item.map_err(|e| OtcError::Storage(e.to_string()))?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// Items for one `(dealId, sourceAddress)`, in ascending `seq` order —
    /// the order sled's key layout already guarantees (invariant I4).
    pub fn iter_queue_items_for_source(
        &self,
        deal_id: DealId,
        source_address: &str,
    ) -> Result<Vec<QueueItem>, OtcError> {
        let mut prefix = deal_id.as_bytes().to_vec();
        prefix.push(0u8);
        prefix.extend_from_slice(source_address.as_bytes());
        let mut out = Vec::new();
        for item in self.queue_items.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(|e| OtcError::Storage(e.to_string()))?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    // ── Account states ────────────────────────────────────────────────────────

    pub fn get_account_state(
        &self,
        chain: &ChainId,
        address: &str,
    ) -> Result<Option<AccountState>, OtcError> {
        let key = account_state_key(chain, address);
        match self
            .account_states
            .get(key)
            .map_err(|e| OtcError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_account_state(&self, state: &AccountState) -> Result<(), OtcError> {
        let key = account_state_key(&state.chain, &state.address);
        let bytes = bincode::serialize(state)?;
        self.account_states
            .insert(key, bytes)
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(())
    }

    // ── Leases ────────────────────────────────────────────────────────────────

    pub fn get_lease(&self, deal_id: DealId) -> Result<Option<Lease>, OtcError> {
        match self
            .leases
            .get(deal_id.as_bytes())
            .map_err(|e| OtcError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_lease(&self, lease: &Lease) -> Result<(), OtcError> {
        let bytes = bincode::serialize(lease)?;
        self.leases
            .insert(lease.deal_id.as_bytes(), bytes)
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn remove_lease(&self, deal_id: DealId) -> Result<(), OtcError> {
        self.leases
            .remove(deal_id.as_bytes())
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(())
    }

    /// All leases currently owned by `owner_id` — used at worker startup to
    /// release anything left over from a crash (§7 "Crash recovery").
    pub fn iter_leases_owned_by(&self, owner_id: &str) -> Result<Vec<Lease>, OtcError> {
        let mut out = Vec::new();
        for item in self.leases.iter() {
            let (_, bytes) = item.map_err(|e| OtcError::Storage(e.to_string()))?;
            let lease: Lease = bincode::deserialize(&bytes)?;
            if lease.owner_id == owner_id {
                out.push(lease);
            }
        }
        Ok(out)
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Appends an event, allocating the next per-deal sequence number from
    /// the `meta` tree (mirrors the teacher's `next_schema_id` counter
    /// pattern).
    pub fn append_event(&self, deal_id: DealId, event: &DealEvent) -> Result<(), OtcError> {
        let seq_key = format!("event_seq:{}", deal_id);
        let current = self
            .meta
            .get(seq_key.as_bytes())
            .map_err(|e| OtcError::Storage(e.to_string()))?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b[..8]);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(0);
        let next = current + 1;
        self.meta
            .insert(seq_key.as_bytes(), &next.to_be_bytes())
            .map_err(|e| OtcError::Storage(e.to_string()))?;

        let mut key = deal_id.as_bytes().to_vec();
        key.extend_from_slice(&next.to_be_bytes());
        let bytes = bincode::serialize(event)?;
        self.events
            .insert(key, bytes)
            .map_err(|e| OtcError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn iter_events_for_deal(&self, deal_id: DealId) -> Result<Vec<DealEvent>, OtcError> {
        let mut out = Vec::new();
        for item in self.events.scan_prefix(deal_id.as_bytes()) {
            let (_, bytes) = item.map_err(|e| OtcError::Storage(e.to_string()))?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }
}
