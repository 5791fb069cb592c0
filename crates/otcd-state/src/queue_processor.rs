//! Queue processing (§4.3). Implements per-source serialization for
//! account chains, the corrected UTXO `phaseReady` rule from §9, stuck-
//! transaction recovery, and the refund/payout interlock (invariant I6).
//! Each step here loads a row, decides, and writes it straight back,
//! since every write here is already scoped to one `QueueItem`/
//! `AccountState` row.

use otcd_core::{
    constants::{MAX_RECOVERY_ATTEMPTS, MIN_GAS_TOPUP_NATIVE_UNITS, RECOVERY_AFTER_SECS_EVM, RECOVERY_AFTER_SECS_UTXO},
    AccountState, ChainFamily, DealId, OtcError, Phase, Purpose, QueueItem, QueueStatus, Timestamp,
};
use otcd_chain::{AdapterRegistry, ChainAdapter, ConfirmationStatus, FeeIntent};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::db::StateDb;

pub struct QueueProcessor<'a> {
    db: &'a StateDb,
    adapters: &'a AdapterRegistry,
}

impl<'a> QueueProcessor<'a> {
    pub fn new(db: &'a StateDb, adapters: &'a AdapterRegistry) -> Self {
        Self { db, adapters }
    }

    /// One queue-processor tick: every deal that can still have pending
    /// queue work (active, or REVERTED still running `TIMEOUT_REFUND`
    /// items) is processed once, gated by the same per-deal lease the
    /// engine tick uses. Mirrors `DealEngine::tick`'s iterate-then-lease
    /// shape so the two tick loops can run independently without
    /// clobbering each other's in-flight deal.
    pub async fn tick(&self, operator_id: &str, now: Timestamp) -> Result<(), OtcError> {
        let lease_mgr = crate::lease::LeaseManager::new(self.db, operator_id);
        let mut deal_ids = self.db.iter_active_deals()?;
        deal_ids.extend(self.db.iter_deals_in_stage(otcd_core::Stage::Reverted)?);
        for deal_id in deal_ids {
            if !lease_mgr.acquire(deal_id, now)? {
                continue;
            }
            if let Err(e) = self.process_deal(deal_id, now).await {
                warn!(%deal_id, error = %e, "queue processor tick failed for deal");
            }
        }
        Ok(())
    }

    /// Processes every distinct source address belonging to `deal_id` once.
    /// Called each queue-processor tick per active deal holding a lease.
    pub async fn process_deal(&self, deal_id: DealId, now: Timestamp) -> Result<(), OtcError> {
        let items = self.db.iter_queue_items_for_deal(deal_id)?;
        let mut by_source: BTreeMap<String, Vec<QueueItem>> = BTreeMap::new();
        for item in items {
            by_source
                .entry(item.source_address.clone())
                .or_default()
                .push(item);
        }
        for (_source, mut group) in by_source {
            group.sort_by_key(|i| i.seq);
            self.process_source_group(&group, now).await?;
        }
        Ok(())
    }

    async fn process_source_group(&self, group: &[QueueItem], now: Timestamp) -> Result<(), OtcError> {
        if group.is_empty() {
            return Ok(());
        }
        let adapter = self.adapters.get(&group[0].chain)?;

        for item in group {
            if item.status == QueueStatus::Submitted {
                self.watch_confirmation(item, adapter.as_ref(), now).await?;
            }
        }

        // Re-read so phase/interlock decisions below see the statuses the
        // watch step above may just have written.
        let deal_id = group[0].deal_id;
        let source = group[0].source_address.clone();
        let refreshed = self.db.iter_queue_items_for_source(deal_id, &source)?;

        match adapter.family() {
            ChainFamily::Account => {
                self.process_account_source(&refreshed, adapter.as_ref(), now).await
            }
            ChainFamily::Utxo => self.process_utxo_source(&refreshed, adapter.as_ref(), now).await,
        }
    }

    /// Account chains: only the earliest non-terminal item for a source may
    /// be acted on, strictly in `seq` order — nonce assignment happens at
    /// submission time, so a later item can never jump ahead of one still
    /// pending.
    async fn process_account_source(
        &self,
        group: &[QueueItem],
        adapter: &dyn ChainAdapter,
        now: Timestamp,
    ) -> Result<(), OtcError> {
        for item in group {
            if item.status.is_terminal() || item.status == QueueStatus::Submitted {
                continue;
            }
            if item.status == QueueStatus::Pending {
                self.check_interlock(group, item)?;
                self.submit_item(item, adapter, now).await?;
            }
            break;
        }
        Ok(())
    }

    /// UTXO chains: items within a ready phase may submit independently of
    /// `seq` (each is its own transaction); phase N only opens once
    /// `may_submit_phase` says phase N-1 has cleared.
    async fn process_utxo_source(
        &self,
        group: &[QueueItem],
        adapter: &dyn ChainAdapter,
        now: Timestamp,
    ) -> Result<(), OtcError> {
        let phased: Vec<&QueueItem> = group.iter().filter(|i| i.phase.is_some()).collect();

        for phase in [Phase::Swap, Phase::Commission, Phase::Refund] {
            if !may_submit_phase(&phased, phase) {
                continue;
            }
            for item in phased.iter().filter(|i| i.phase == Some(phase)) {
                if item.status == QueueStatus::Pending {
                    self.check_interlock(group, item)?;
                    self.submit_item(item, adapter, now).await?;
                }
            }
        }

        // Items with no phase (TIMEOUT_REFUND, GAS_REFUND_TO_TANK) aren't
        // gated by phase ordering, only by the refund/payout interlock.
        for item in group.iter().filter(|i| i.phase.is_none()) {
            if item.status == QueueStatus::Pending {
                self.check_interlock(group, item)?;
                self.submit_item(item, adapter, now).await?;
            }
        }
        Ok(())
    }

    /// Invariant I6: a `TIMEOUT_REFUND` and a `SWAP_PAYOUT`/`OP_COMMISSION`/
    /// `BROKER_SWAP` for the same source can never both be non-terminal at
    /// once.
    fn check_interlock(&self, group: &[QueueItem], candidate: &QueueItem) -> Result<(), OtcError> {
        let candidate_is_refund = candidate.purpose == Purpose::TimeoutRefund;
        let candidate_is_payout = is_payout_family(candidate.purpose);
        if !candidate_is_refund && !candidate_is_payout {
            return Ok(());
        }
        for other in group {
            if other.id == candidate.id || other.status.is_terminal() {
                continue;
            }
            let other_is_refund = other.purpose == Purpose::TimeoutRefund;
            let other_is_payout = is_payout_family(other.purpose);
            if candidate_is_refund && other_is_payout {
                return Err(OtcError::RefundPayoutConflict {
                    attempted: "TIMEOUT_REFUND".to_string(),
                    conflict: format!("{:?}", other.purpose),
                    source: candidate.source_address.clone(),
                });
            }
            if candidate_is_payout && other_is_refund {
                return Err(OtcError::RefundPayoutConflict {
                    attempted: format!("{:?}", candidate.purpose),
                    conflict: "TIMEOUT_REFUND".to_string(),
                    source: candidate.source_address.clone(),
                });
            }
        }
        Ok(())
    }

    async fn submit_item(
        &self,
        item: &QueueItem,
        adapter: &dyn ChainAdapter,
        now: Timestamp,
    ) -> Result<(), OtcError> {
        let mut item = item.clone();
        item.status = QueueStatus::Submitting;
        self.db.put_queue_item(&item)?;

        let min_native = otcd_core::AssetAmount::from_str_exact(MIN_GAS_TOPUP_NATIVE_UNITS)
            .map_err(|e| OtcError::Other(e.to_string()))?;
        adapter
            .ensure_fee_budget(&item.source_address, &item.asset, FeeIntent::Payout, min_native)
            .await?;

        // A rebroadcast after stuck-tx recovery reuses the already-assigned
        // nonce; only a first submission allocates a fresh one.
        if adapter.family() == ChainFamily::Account && item.submitted_tx.nonce.is_none() {
            let mut account = self
                .db
                .get_account_state(&item.chain, &item.source_address)?
                .unwrap_or_else(|| AccountState::new(item.chain.clone(), item.source_address.clone()));
            let nonce = account.next_nonce();
            self.db.put_account_state(&account)?;
            item.submitted_tx.nonce = Some(nonce);
        }

        match adapter
            .send(&item.asset, &item.source_address, &item.destination_address, item.amount)
            .await
        {
            Ok(result) => {
                item.submitted_tx.txid = Some(result.txid.clone());
                item.submitted_tx.submitted_at = Some(result.submitted_at.max(now));
                item.submitted_tx.nonce = result.nonce.or(item.submitted_tx.nonce);
                item.submitted_tx.utxo_inputs = result.utxo_inputs;
                item.submitted_tx.required_confirms = adapter.required_confirms();
                item.submitted_tx.confirmations = 0;
                item.status = QueueStatus::Submitted;
                self.db.put_queue_item(&item)?;
                info!(item_id = %item.id, txid = %result.txid, "queue item submitted");
                Ok(())
            }
            Err(e) => {
                if let (Some(nonce), ChainFamily::Account) = (item.submitted_tx.nonce, adapter.family()) {
                    if let Some(mut account) = self.db.get_account_state(&item.chain, &item.source_address)? {
                        if account.rollback_if_latest(nonce) {
                            self.db.put_account_state(&account)?;
                            item.submitted_tx.nonce = None;
                        }
                    }
                }
                item.status = QueueStatus::Pending;
                item.last_error = Some(e.to_string());
                self.db.put_queue_item(&item)?;
                warn!(item_id = %item.id, error = %e, "submit failed, item returned to pending");
                Err(e)
            }
        }
    }

    async fn watch_confirmation(
        &self,
        item: &QueueItem,
        adapter: &dyn ChainAdapter,
        now: Timestamp,
    ) -> Result<(), OtcError> {
        let Some(txid) = item.submitted_tx.txid.clone() else {
            return Ok(());
        };
        let mut item = item.clone();
        match adapter.get_tx_confirmations(&txid).await? {
            ConfirmationStatus::Confirmed(confs) => {
                item.submitted_tx.confirmations = confs;
                if confs >= adapter.required_confirms() {
                    item.status = QueueStatus::Completed;
                    self.db.put_queue_item(&item)?;
                    info!(item_id = %item.id, "queue item completed");
                    return Ok(());
                }
                self.db.put_queue_item(&item)?;
                self.maybe_recover_stuck(&mut item, adapter, now).await
            }
            ConfirmationStatus::Unknown => {
                // Dropped, replaced, or reorged out — recover regardless of
                // elapsed time since we have nothing left to watch.
                self.recover_stuck(&mut item, now).await
            }
        }
    }

    async fn maybe_recover_stuck(
        &self,
        item: &mut QueueItem,
        adapter: &dyn ChainAdapter,
        now: Timestamp,
    ) -> Result<(), OtcError> {
        if item.submitted_tx.confirmations > 0 {
            return Ok(());
        }
        let Some(submitted_at) = item.submitted_tx.submitted_at else {
            return Ok(());
        };
        let window = match adapter.family() {
            ChainFamily::Account => RECOVERY_AFTER_SECS_EVM,
            ChainFamily::Utxo => RECOVERY_AFTER_SECS_UTXO,
        };
        if now - submitted_at < window {
            return Ok(());
        }
        self.recover_stuck(item, now).await
    }

    async fn recover_stuck(&self, item: &mut QueueItem, now: Timestamp) -> Result<(), OtcError> {
        if item.recovery.attempt_count >= MAX_RECOVERY_ATTEMPTS {
            item.status = QueueStatus::Failed;
            item.last_error = Some("stuck-transaction recovery attempts exhausted".to_string());
            self.db.put_queue_item(item)?;
            warn!(item_id = %item.id, "recovery attempts exhausted, item failed");
            return Err(OtcError::RecoveryAttemptsExhausted(
                item.id.clone(),
                MAX_RECOVERY_ATTEMPTS,
            ));
        }
        item.recovery.attempt_count += 1;
        item.recovery.last_fee_bump_at = Some(now);
        if item.recovery.original_nonce.is_none() {
            item.recovery.original_nonce = item.submitted_tx.nonce;
        }
        item.status = QueueStatus::Pending;
        item.submitted_tx.txid = None;
        self.db.put_queue_item(item)?;
        warn!(item_id = %item.id, attempt = item.recovery.attempt_count, "rebroadcasting stuck transaction");
        Ok(())
    }
}

fn is_payout_family(purpose: Purpose) -> bool {
    matches!(
        purpose,
        Purpose::SwapPayout | Purpose::OpCommission | Purpose::BrokerSwap
    )
}

/// §9's corrected rule: `phaseReady(n) := count(items in phase n) > 0 ∧ all
/// completed, OR count(items in phase n) = 0 ∧ phaseReady(n-1)`, with
/// `phaseReady(0) := true` (nothing precedes phase 1). The original bug
/// treated an empty phase as *not* ready, permanently stalling deals whose
/// commission plan has zero commission items.
fn phase_ready(items: &[&QueueItem], phase: Phase) -> bool {
    let prior_ready = match phase {
        Phase::Swap => true,
        Phase::Commission => phase_ready(items, Phase::Swap),
        Phase::Refund => phase_ready(items, Phase::Commission),
    };
    let in_phase: Vec<_> = items.iter().filter(|i| i.phase == Some(phase)).collect();
    if in_phase.is_empty() {
        prior_ready
    } else {
        in_phase.iter().all(|i| i.status == QueueStatus::Completed)
    }
}

/// Whether `phase`'s pending items may be submitted now — true iff the
/// immediately preceding phase is `phaseReady`.
fn may_submit_phase(items: &[&QueueItem], phase: Phase) -> bool {
    match phase {
        Phase::Swap => true,
        Phase::Commission => phase_ready(items, Phase::Swap),
        Phase::Refund => phase_ready(items, Phase::Commission),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otcd_chain::{AdapterRegistry, MockAdapter};
    use otcd_core::{AssetAmount, AssetCode, ChainId, DealId as DId, SubmittedTx, RecoveryInfo};
    use std::sync::Arc;

    fn temp_db(name: &str) -> StateDb {
        let dir = std::env::temp_dir().join(format!("otcd_queue_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        StateDb::open(&dir).expect("open temp db")
    }

    fn item(
        deal_id: DId,
        chain: &str,
        source: &str,
        seq: u64,
        purpose: Purpose,
        phase: Option<Phase>,
        status: QueueStatus,
    ) -> QueueItem {
        QueueItem {
            id: format!("{}-{}", source, seq),
            deal_id,
            chain: ChainId::new(chain),
            source_address: source.to_string(),
            destination_address: "dest".to_string(),
            asset: AssetCode::new("ALPHA"),
            amount: AssetAmount::from_str_exact("1").unwrap(),
            purpose,
            phase,
            seq,
            status,
            submitted_tx: SubmittedTx::default(),
            recovery: RecoveryInfo::default(),
            created_at: 0,
            last_error: None,
        }
    }

    #[test]
    fn empty_phase_does_not_stall_later_phases() {
        let deal_id = DId::new_random();
        // No SWAP item at all, a pending COMMISSION item.
        let comm = item(
            deal_id,
            "alpha-utxo",
            "src",
            1,
            Purpose::OpCommission,
            Some(Phase::Commission),
            QueueStatus::Pending,
        );
        let items = vec![&comm];
        assert!(may_submit_phase(&items, Phase::Commission));
    }

    #[test]
    fn incomplete_phase_blocks_next_phase() {
        let deal_id = DId::new_random();
        let swap = item(
            deal_id,
            "alpha-utxo",
            "src",
            1,
            Purpose::SwapPayout,
            Some(Phase::Swap),
            QueueStatus::Submitted,
        );
        let comm = item(
            deal_id,
            "alpha-utxo",
            "src",
            2,
            Purpose::OpCommission,
            Some(Phase::Commission),
            QueueStatus::Pending,
        );
        let items = vec![&swap, &comm];
        assert!(!may_submit_phase(&items, Phase::Commission));
    }

    #[test]
    fn completed_phase_unblocks_next_phase() {
        let deal_id = DId::new_random();
        let swap = item(
            deal_id,
            "alpha-utxo",
            "src",
            1,
            Purpose::SwapPayout,
            Some(Phase::Swap),
            QueueStatus::Completed,
        );
        let items = vec![&swap];
        assert!(may_submit_phase(&items, Phase::Commission));
        assert!(may_submit_phase(&items, Phase::Refund));
    }

    #[tokio::test]
    async fn interlock_rejects_refund_alongside_pending_payout() {
        let db = temp_db("interlock");
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(MockAdapter::new_utxo("alpha-utxo")));
        let processor = QueueProcessor::new(&db, &adapters);

        let deal_id = DId::new_random();
        let payout = item(
            deal_id,
            "alpha-utxo",
            "src",
            1,
            Purpose::SwapPayout,
            Some(Phase::Swap),
            QueueStatus::Submitted,
        );
        let refund = item(
            deal_id,
            "alpha-utxo",
            "src",
            2,
            Purpose::TimeoutRefund,
            None,
            QueueStatus::Pending,
        );
        let group = vec![payout, refund.clone()];
        let result = processor.check_interlock(&group, &refund);
        assert!(matches!(result, Err(OtcError::RefundPayoutConflict { .. })));
    }

    #[tokio::test]
    async fn account_chain_submits_then_completes_across_ticks() {
        let db = temp_db("account_flow");
        let mut adapters = AdapterRegistry::new();
        let adapter = Arc::new(MockAdapter::new_account("evm-l1"));
        adapters.register(adapter.clone());
        let processor = QueueProcessor::new(&db, &adapters);

        let deal_id = DId::new_random();
        let queued = item(
            deal_id,
            "evm-l1",
            "0xescrow",
            1,
            Purpose::SwapPayout,
            Some(Phase::Swap),
            QueueStatus::Pending,
        );
        db.put_queue_item(&queued).unwrap();

        processor.process_deal(deal_id, 0).await.unwrap();
        let fetched = db.get_queue_item(&queued.id).unwrap().unwrap();
        assert_eq!(fetched.status, QueueStatus::Submitted);
        let txid = fetched.submitted_tx.txid.clone().unwrap();

        adapter.set_tx_status(&txid, otcd_chain::ConfirmationStatus::Confirmed(3));
        processor.process_deal(deal_id, 10).await.unwrap();
        let fetched = db.get_queue_item(&queued.id).unwrap().unwrap();
        assert_eq!(fetched.status, QueueStatus::Completed);
    }

    #[tokio::test]
    async fn stuck_submitted_tx_recovers_after_window() {
        let db = temp_db("recovery");
        let mut adapters = AdapterRegistry::new();
        let adapter = Arc::new(MockAdapter::new_account("evm-l1"));
        adapters.register(adapter.clone());
        let processor = QueueProcessor::new(&db, &adapters);

        let deal_id = DId::new_random();
        let queued = item(
            deal_id,
            "evm-l1",
            "0xescrow",
            1,
            Purpose::SwapPayout,
            Some(Phase::Swap),
            QueueStatus::Pending,
        );
        db.put_queue_item(&queued).unwrap();
        processor.process_deal(deal_id, 0).await.unwrap();

        // Past the EVM recovery window with zero confirmations the whole
        // time (mock leaves confirmations at 0 by default): the item is
        // bumped back to pending and immediately rebroadcast in the same
        // tick, reusing its already-assigned nonce.
        let original_nonce = db
            .get_queue_item(&queued.id)
            .unwrap()
            .unwrap()
            .submitted_tx
            .nonce;
        processor
            .process_deal(deal_id, RECOVERY_AFTER_SECS_EVM + 1)
            .await
            .unwrap();
        let fetched = db.get_queue_item(&queued.id).unwrap().unwrap();
        assert_eq!(fetched.status, QueueStatus::Submitted);
        assert_eq!(fetched.recovery.attempt_count, 1);
        assert_eq!(fetched.recovery.original_nonce, original_nonce);
        assert_eq!(fetched.submitted_tx.nonce, original_nonce);
    }
}
