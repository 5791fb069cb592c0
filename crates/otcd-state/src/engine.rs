//! Deal-processing engine (§4.1 transition table). Drives the state
//! machine one tick at a time: deposit polling, lock evaluation, stage
//! transitions, and plan construction. One bounded-batch outer loop over
//! due work, one focused function per unit of work, reloading persisted
//! state at the top of each rather than trusting anything carried over
//! from a previous tick (§9 "no shared mutable state").

use otcd_core::{
    constants::{COLLECT_CONFIRMS_EVM_L1, COLLECT_CONFIRMS_POLYGON, COLLECT_CONFIRMS_UTXO},
    AssetRegistry, ChainConfig, Deal, DealEvent, DealId, OtcError, PartyDetails,
    PersonalLinkToken, Side, Stage, Timestamp,
};
use otcd_chain::AdapterRegistry;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::db::StateDb;
use crate::deposit_tracker::DepositTracker;
use crate::lock_eval;
use crate::plan_builder;

/// Fallback per-chain finality margin, keyed by chain id, used when a
/// chain has no adapter-reported override. Chain adapters are the source
/// of truth (`ChainAdapter::collect_confirms`); this only seeds the demo
/// chain ids these constants were named after.
fn fallback_collect_confirms(chain: &str) -> u64 {
    match chain {
        "evm-l1" => COLLECT_CONFIRMS_EVM_L1,
        "polygon" => COLLECT_CONFIRMS_POLYGON,
        _ => COLLECT_CONFIRMS_UTXO,
    }
}

pub struct DealEngine<'a> {
    db: &'a StateDb,
    adapters: &'a AdapterRegistry,
    registry: &'a AssetRegistry,
    chain_configs: &'a HashMap<otcd_core::ChainId, ChainConfig>,
    operator_id: String,
}

impl<'a> DealEngine<'a> {
    pub fn new(
        db: &'a StateDb,
        adapters: &'a AdapterRegistry,
        registry: &'a AssetRegistry,
        chain_configs: &'a HashMap<otcd_core::ChainId, ChainConfig>,
        operator_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            adapters,
            registry,
            chain_configs,
            operator_id: operator_id.into(),
        }
    }

    /// One engine tick (§5 "Engine tick"): every active deal whose lease
    /// this worker holds is processed once. REVERTED/CLOSED deals are
    /// included too — they still need driving towards CLOSED and the
    /// 7-day late-deposit watch respectively.
    pub async fn tick(&self, now: Timestamp) -> Result<(), OtcError> {
        let lease_mgr = crate::lease::LeaseManager::new(self.db, self.operator_id.clone());
        let mut deal_ids = self.db.iter_active_deals()?;
        deal_ids.extend(self.db.iter_deals_in_stage(Stage::Reverted)?);
        deal_ids.extend(self.db.iter_deals_in_stage(Stage::Closed)?);
        for deal_id in deal_ids {
            if !lease_mgr.acquire(deal_id, now)? {
                continue;
            }
            if let Err(e) = self.process_deal(deal_id, now).await {
                warn!(%deal_id, error = %e, "engine tick failed for deal");
            }
        }
        Ok(())
    }

    pub async fn process_deal(&self, deal_id: DealId, now: Timestamp) -> Result<(), OtcError> {
        let Some(mut deal) = self.db.get_deal(deal_id)? else {
            return Err(OtcError::UnknownDeal(deal_id.to_string()));
        };

        match deal.stage {
            Stage::Created => self.tick_created(&mut deal, now)?,
            Stage::Collection => self.tick_collection(&mut deal, now).await?,
            Stage::Waiting => self.tick_waiting(&mut deal, now).await?,
            Stage::Swap => self.tick_swap(&mut deal, now).await?,
            Stage::Reverted => self.tick_reverted(&mut deal, now)?,
            Stage::Closed => self.tick_closed_late_deposit(&mut deal, now).await?,
        }
        Ok(())
    }

    /// Backs the `fillDetails` RPC method. Resolves which side `token`
    /// belongs to, records the party's routing addresses, generates that
    /// side's escrow on first fill, and immediately attempts the
    /// CREATED -> COLLECTION transition in case this was the second side.
    pub async fn fill_details(
        &self,
        deal_id: DealId,
        token: PersonalLinkToken,
        payback_address: String,
        recipient_address: String,
        email: Option<String>,
        now: Timestamp,
    ) -> Result<Deal, OtcError> {
        let lease_mgr = crate::lease::LeaseManager::new(self.db, self.operator_id.clone());
        if !lease_mgr.acquire(deal_id, now)? {
            return Err(OtcError::LeaseContended);
        }
        let Some(mut deal) = self.db.get_deal(deal_id)? else {
            return Err(OtcError::UnknownDeal(deal_id.to_string()));
        };
        if deal.stage != Stage::Created {
            return Err(OtcError::InvalidStageTransition {
                from: deal.stage,
                to: Stage::Collection,
            });
        }
        let side = self.resolve_side(&deal, &token)?;

        let deal_side = deal.side_mut(side);
        deal_side.party = PartyDetails {
            payback_address: Some(payback_address),
            recipient_address: Some(recipient_address),
            email,
        };
        if deal_side.escrow.is_none() {
            let adapter = self.adapters.get(&deal_side.chain)?;
            let handle = adapter.generate_escrow(&deal_side.asset, deal_id, side);
            deal_side.escrow = Some(otcd_core::EscrowRef {
                chain: deal_side.chain.clone(),
                address: handle.address,
                hd_path: handle.hd_path,
            });
        }
        info!(deal_id = %deal.id, ?side, "party details filled");
        self.db.put_deal(&deal, Some(Stage::Created))?;
        self.tick_created(&mut deal, now)?;
        Ok(deal)
    }

    /// Backs the `cancel` RPC method. Only allowed while CREATED and only
    /// if no deposit has yet been observed on either side, so no refund
    /// accounting is needed.
    pub fn cancel(&self, deal_id: DealId, token: PersonalLinkToken, now: Timestamp) -> Result<Deal, OtcError> {
        let lease_mgr = crate::lease::LeaseManager::new(self.db, self.operator_id.clone());
        if !lease_mgr.acquire(deal_id, now)? {
            return Err(OtcError::LeaseContended);
        }
        let Some(mut deal) = self.db.get_deal(deal_id)? else {
            return Err(OtcError::UnknownDeal(deal_id.to_string()));
        };
        self.resolve_side(&deal, &token)?;
        if deal.stage != Stage::Created {
            return Err(OtcError::CancelNotAllowed);
        }
        for side in [Side::A, Side::B] {
            if !self.db.iter_deposits_for_side(deal.id, side)?.is_empty() {
                return Err(OtcError::CancelNotAllowed);
            }
        }
        deal.closed_at = Some(now);
        self.transition(&mut deal, Stage::Closed, now)?;
        self.db.put_deal(&deal, Some(Stage::Created))?;
        Ok(deal)
    }

    /// Operator-only override for a deal stuck in SWAP behind a FAILED
    /// item. SWAP never times out automatically (§4.1); this is the
    /// manual escape hatch, not wired to any RPC method. Assumes the
    /// operator has already reconciled on-chain funds by hand.
    pub fn force_revert(&self, deal_id: DealId, now: Timestamp) -> Result<Deal, OtcError> {
        let lease_mgr = crate::lease::LeaseManager::new(self.db, self.operator_id.clone());
        if !lease_mgr.acquire(deal_id, now)? {
            return Err(OtcError::LeaseContended);
        }
        let Some(mut deal) = self.db.get_deal(deal_id)? else {
            return Err(OtcError::UnknownDeal(deal_id.to_string()));
        };
        if deal.stage != Stage::Swap {
            return Err(OtcError::SwapStalled(format!(
                "deal not in SWAP (currently {:?})",
                deal.stage
            )));
        }
        self.db.append_event(
            deal.id,
            &DealEvent::OperatorNote {
                message: "force_revert invoked by operator".to_string(),
            },
        )?;
        deal.closed_at = Some(now);
        self.transition(&mut deal, Stage::Reverted, now)?;
        self.db.put_deal(&deal, Some(Stage::Swap))?;
        Ok(deal)
    }

    fn resolve_side(&self, deal: &Deal, token: &PersonalLinkToken) -> Result<Side, OtcError> {
        if *token == deal.token_a {
            Ok(Side::A)
        } else if *token == deal.token_b {
            Ok(Side::B)
        } else {
            Err(OtcError::InvalidToken)
        }
    }

    /// CREATED -> COLLECTION: both parties complete, both escrows
    /// generated. Freezes the commission plan (I3, already attached when
    /// details were filled) and sets `expiresAt` (I2).
    fn tick_created(&self, deal: &mut Deal, now: Timestamp) -> Result<(), OtcError> {
        if !deal.both_parties_complete() || !deal.both_escrows_generated() {
            return Ok(());
        }
        self.transition(deal, Stage::Collection, now)?;
        deal.expires_at = Some(now + deal.timeout_secs);
        self.db.put_deal(deal, Some(Stage::Created))?;
        Ok(())
    }

    /// COLLECTION -> WAITING once both sides' locks hold, or COLLECTION ->
    /// REVERTED on timeout. Polls deposits and re-evaluates locks first.
    async fn tick_collection(&self, deal: &mut Deal, now: Timestamp) -> Result<(), OtcError> {
        let Some(expires_at) = deal.expires_at else {
            return Err(OtcError::InvariantViolation(
                "COLLECTION stage without expires_at".to_string(),
            ));
        };
        if now > expires_at {
            self.revert_with_timeout_refunds(deal, now).await?;
            return Ok(());
        }

        self.poll_and_lock(deal, now, expires_at).await?;

        if deal.both_locked() {
            self.transition(deal, Stage::Waiting, now)?;
            self.db.put_deal(deal, Some(Stage::Collection))?;
        }
        Ok(())
    }

    /// WAITING -> SWAP once both sides have stayed locked across a full
    /// tick boundary (lock timestamp strictly before `now`); WAITING ->
    /// COLLECTION if a reorg drops a lock; WAITING -> REVERTED on timeout.
    async fn tick_waiting(&self, deal: &mut Deal, now: Timestamp) -> Result<(), OtcError> {
        let Some(expires_at) = deal.expires_at else {
            return Err(OtcError::InvariantViolation(
                "WAITING stage without suspended expires_at".to_string(),
            ));
        };
        if now > expires_at {
            self.revert_with_timeout_refunds(deal, now).await?;
            return Ok(());
        }

        self.poll_and_lock(deal, now, expires_at).await?;

        if !deal.both_locked() {
            // A previously eligible deposit fell below threshold or
            // disappeared. Clear locks and resume the timer from the
            // suspended expires_at (still intact — never touched in
            // WAITING).
            deal.side_a.clear_locks();
            deal.side_b.clear_locks();
            self.transition(deal, Stage::Collection, now)?;
            self.db.put_deal(deal, Some(Stage::Waiting))?;
            return Ok(());
        }

        let locked_before_this_tick = |locked_at: Option<Timestamp>| {
            locked_at.map(|t| t < now).unwrap_or(false)
        };
        let stable = locked_before_this_tick(deal.side_a.trade_locked_at)
            && locked_before_this_tick(deal.side_a.commission_locked_at)
            && locked_before_this_tick(deal.side_b.trade_locked_at)
            && locked_before_this_tick(deal.side_b.commission_locked_at);
        if !stable {
            self.db.put_deal(deal, Some(Stage::Waiting))?;
            return Ok(());
        }

        self.build_and_persist_plan(deal, now)?;
        deal.expires_at = None;
        self.transition(deal, Stage::Swap, now)?;
        self.db.put_deal(deal, Some(Stage::Waiting))?;
        Ok(())
    }

    /// SWAP -> CLOSED once every non-refund item for the deal is
    /// COMPLETED. A FAILED non-refund item keeps the deal in SWAP (§4.1
    /// "SWAP cannot time out") for operator intervention. Before checking
    /// completion, gives each side a chance to enqueue its
    /// GAS_REFUND_TO_TANK sweep once that side's own settlement items have
    /// landed, so the sweep is gated into the same completion check.
    async fn tick_swap(&self, deal: &mut Deal, now: Timestamp) -> Result<(), OtcError> {
        for side in [Side::A, Side::B] {
            self.maybe_enqueue_gas_refund(deal, side, now).await?;
        }

        let items = self.db.iter_queue_items_for_deal(deal.id)?;
        let settlement_items: Vec<_> = items
            .iter()
            .filter(|i| i.purpose != otcd_core::Purpose::TimeoutRefund)
            .collect();
        if settlement_items.is_empty() {
            return Ok(());
        }
        let any_failed = settlement_items
            .iter()
            .any(|i| i.status == otcd_core::QueueStatus::Failed);
        if any_failed {
            warn!(deal_id = %deal.id, "swap item failed terminally, operator intervention required");
            return Ok(());
        }
        let all_completed = settlement_items
            .iter()
            .all(|i| i.status == otcd_core::QueueStatus::Completed);
        if !all_completed {
            return Ok(());
        }
        deal.closed_at = Some(now);
        self.transition(deal, Stage::Closed, now)?;
        self.db.put_deal(deal, Some(Stage::Swap))?;
        Ok(())
    }

    /// Enqueues this side's GAS_REFUND_TO_TANK sweep (§4.3 "Gas funding
    /// (EVM only)") once every other item sourced from its escrow has
    /// settled. No-ops on UTXO chains, chains with no configured tank
    /// address, a side with no escrow yet, or once the sweep has already
    /// been enqueued for this source.
    async fn maybe_enqueue_gas_refund(&self, deal: &mut Deal, side: Side, now: Timestamp) -> Result<(), OtcError> {
        let Some(escrow) = deal.side(side).escrow.clone() else {
            return Ok(());
        };
        let adapter = self.adapters.get(&escrow.chain)?;
        if adapter.family() != otcd_core::ChainFamily::Account {
            return Ok(());
        }
        let chain_config = self.chain_configs.get(&escrow.chain);
        if chain_config.and_then(|c| c.gas_tank_address.as_ref()).is_none() {
            return Ok(());
        }

        let items = self.db.iter_queue_items_for_deal(deal.id)?;
        let from_this_source: Vec<_> = items
            .iter()
            .filter(|i| i.source_address == escrow.address)
            .collect();
        if from_this_source
            .iter()
            .any(|i| i.purpose == otcd_core::Purpose::GasRefundToTank)
        {
            return Ok(());
        }
        let settlement_from_this_source: Vec<_> = from_this_source
            .iter()
            .filter(|i| i.purpose != otcd_core::Purpose::TimeoutRefund)
            .collect();
        if settlement_from_this_source.is_empty()
            || !settlement_from_this_source
                .iter()
                .all(|i| i.status == otcd_core::QueueStatus::Completed)
        {
            return Ok(());
        }

        let balance = adapter.native_balance(&escrow.address).await?;
        if let Some(item) = plan_builder::build_gas_refund_plan(
            deal,
            side,
            self.registry,
            chain_config,
            adapter.as_ref(),
            balance,
            now,
        )? {
            self.db.append_event(
                deal.id,
                &DealEvent::QueueItemEnqueued {
                    queue_item_id: item.id.clone(),
                    purpose: format!("{:?}", item.purpose),
                },
            )?;
            self.db.put_queue_item(&item)?;
            self.db.put_deal(deal, Some(Stage::Swap))?;
        }
        Ok(())
    }

    /// REVERTED -> CLOSED once every TIMEOUT_REFUND is COMPLETED.
    fn tick_reverted(&self, deal: &mut Deal, now: Timestamp) -> Result<(), OtcError> {
        let items = self.db.iter_queue_items_for_deal(deal.id)?;
        let refunds: Vec<_> = items
            .iter()
            .filter(|i| i.purpose == otcd_core::Purpose::TimeoutRefund)
            .collect();
        if refunds.is_empty() || refunds.iter().any(|i| i.status != otcd_core::QueueStatus::Completed) {
            return Ok(());
        }
        deal.closed_at = Some(now);
        self.transition(deal, Stage::Closed, now)?;
        self.db.put_deal(deal, Some(Stage::Reverted))?;
        Ok(())
    }

    /// CLOSED -> CLOSED: the 7-day late-deposit watcher.
    async fn tick_closed_late_deposit(&self, deal: &mut Deal, now: Timestamp) -> Result<(), OtcError> {
        let watcher = crate::watcher::LateDepositWatcher::new(self.db);
        watcher.check(deal, now, self.adapters, self.registry).await?;
        self.db.put_deal(deal, Some(Stage::Closed))?;
        Ok(())
    }

    /// Polls both sides' deposits and re-evaluates their locks in place.
    async fn poll_and_lock(&self, deal: &mut Deal, now: Timestamp, expires_at: Timestamp) -> Result<(), OtcError> {
        let tracker = DepositTracker::new(self.db);
        for side in [Side::A, Side::B] {
            let Some(escrow) = deal.side(side).escrow.clone() else {
                continue;
            };
            let adapter = self.adapters.get(&escrow.chain)?;
            tracker.poll_side(deal, side, adapter.as_ref(), self.registry).await?;

            let commission = deal
                .side(side)
                .commission_plan
                .clone()
                .ok_or_else(|| OtcError::CommissionPlanIncomplete(format!("{:?}", side)))?;
            let trade_asset = deal.side(side).asset.clone();
            let trade_amount = deal.side(side).amount;
            let scale = self.registry.decimals(&trade_asset);
            let collect_confirms = adapter.collect_confirms();

            let deposits = self.db.iter_deposits_for_side(deal.id, side)?;
            let trade_eligible = lock_eval::sum_eligible(
                &deposits
                    .iter()
                    .filter(|d| d.asset == trade_asset)
                    .cloned()
                    .collect::<Vec<_>>(),
                collect_confirms,
                expires_at,
            );
            let comm_asset = match commission.currency {
                otcd_core::CommissionCurrency::Asset => trade_asset.clone(),
                otcd_core::CommissionCurrency::Native => self
                    .registry
                    .native_asset_for_chain(&escrow.chain)
                    .unwrap_or_else(|| trade_asset.clone()),
            };
            let comm_eligible = if comm_asset == trade_asset {
                trade_eligible
            } else {
                lock_eval::sum_eligible(
                    &deposits
                        .iter()
                        .filter(|d| d.asset == comm_asset)
                        .cloned()
                        .collect::<Vec<_>>(),
                    collect_confirms,
                    expires_at,
                )
            };

            let eval = lock_eval::evaluate(trade_amount, &commission, scale, trade_eligible, comm_eligible)?;
            let deal_side = deal.side_mut(side);
            if eval.trade_locked && deal_side.trade_locked_at.is_none() {
                deal_side.trade_locked_at = Some(now);
            } else if !eval.trade_locked {
                deal_side.trade_locked_at = None;
            }
            if eval.commission_locked && deal_side.commission_locked_at.is_none() {
                deal_side.commission_locked_at = Some(now);
            } else if !eval.commission_locked {
                deal_side.commission_locked_at = None;
            }
            if eval.trade_locked && eval.commission_locked {
                self.db.append_event(deal.id, &DealEvent::SideLocked { side, at: now })?;
            }
        }
        Ok(())
    }

    /// WAITING/COLLECTION -> REVERTED on timeout: enqueues TIMEOUT_REFUND
    /// for every confirmed deposit on both sides.
    async fn revert_with_timeout_refunds(&self, deal: &mut Deal, now: Timestamp) -> Result<(), OtcError> {
        let prior = deal.stage;
        for side in [Side::A, Side::B] {
            let deposits = self.db.iter_deposits_for_side(deal.id, side)?;
            if deposits.is_empty() {
                continue;
            }
            let chain = deal.side(side).chain.clone();
            let adapter = self.adapters.get(&chain)?;
            let items =
                plan_builder::build_timeout_refund_plan(deal, side, &deposits, adapter.as_ref(), now)?;
            for item in items {
                self.db.append_event(
                    deal.id,
                    &DealEvent::QueueItemEnqueued {
                        queue_item_id: item.id.clone(),
                        purpose: format!("{:?}", item.purpose),
                    },
                )?;
                self.db.put_queue_item(&item)?;
            }
        }
        self.transition(deal, Stage::Reverted, now)?;
        deal.expires_at = None;
        self.db.put_deal(deal, Some(prior))?;
        Ok(())
    }

    /// WAITING -> SWAP side effect: builds both sides' plans and persists
    /// the resulting queue items alongside the deal's `next_seq` counters.
    fn build_and_persist_plan(&self, deal: &mut Deal, now: Timestamp) -> Result<(), OtcError> {
        let mut item_count = 0;
        for side in [Side::A, Side::B] {
            let escrow = deal
                .side(side)
                .escrow
                .clone()
                .ok_or_else(|| OtcError::InvariantViolation(format!("side {:?} has no escrow", side)))?;
            let chain_config = self.chain_configs.get(&escrow.chain);
            let adapter = self.adapters.get(&escrow.chain)?;
            let operator_address = adapter.operator_address();
            let deposits = self.db.iter_deposits_for_side(deal.id, side)?;

            let items = plan_builder::build_side_plan(
                deal,
                side,
                &deposits,
                self.registry,
                chain_config,
                &operator_address,
                adapter.as_ref(),
                now,
            )?;
            item_count += items.len();
            for item in items {
                self.db.append_event(
                    deal.id,
                    &DealEvent::QueueItemEnqueued {
                        queue_item_id: item.id.clone(),
                        purpose: format!("{:?}", item.purpose),
                    },
                )?;
                self.db.put_queue_item(&item)?;
            }
            for mut dep in deposits {
                dep.refunded = true;
                self.db.put_deposit(&dep)?;
            }
        }
        self.db.append_event(deal.id, &DealEvent::PlanBuilt { item_count })?;
        Ok(())
    }

    fn transition(&self, deal: &mut Deal, to: Stage, now: Timestamp) -> Result<(), OtcError> {
        let from = deal.stage;
        self.db.append_event(deal.id, &DealEvent::StageTransition { from, to, at: now })?;
        info!(deal_id = %deal.id, ?from, ?to, "stage transition");
        deal.stage = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otcd_chain::MockAdapter;
    use otcd_core::{
        AssetAmount, AssetCode, ChainId, CommissionMode, CommissionRequirement, DealSide,
        EscrowRef, PartyDetails, PersonalLinkToken,
    };
    use std::sync::Arc;

    fn temp_db(name: &str) -> StateDb {
        let dir = std::env::temp_dir().join(format!("otcd_engine_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        StateDb::open(&dir).expect("open temp db")
    }

    fn registry() -> AssetRegistry {
        let mut r = AssetRegistry::new();
        r.register(
            AssetCode::new("ALPHA"),
            otcd_core::AssetInfo {
                chain: ChainId::new("alpha-utxo"),
                family: otcd_core::ChainFamily::Utxo,
                decimals: 8,
                min_sendable_unit: rust_decimal::Decimal::new(1, 8),
                native: true,
            },
        );
        r.register(
            AssetCode::new("USDC"),
            otcd_core::AssetInfo {
                chain: ChainId::new("evm-l1"),
                family: otcd_core::ChainFamily::Account,
                decimals: 6,
                min_sendable_unit: rust_decimal::Decimal::new(1, 6),
                native: false,
            },
        );
        r
    }

    fn bare_side(chain: &str, asset: &str, amount: &str, escrow_addr: &str, bps: u32) -> DealSide {
        DealSide {
            chain: ChainId::new(chain),
            asset: AssetCode::new(asset),
            amount: AssetAmount::from_str_exact(amount).unwrap(),
            party: PartyDetails {
                payback_address: Some(format!("{}-payback", escrow_addr)),
                recipient_address: Some(format!("{}-recipient", escrow_addr)),
                email: None,
            },
            escrow: Some(EscrowRef {
                chain: ChainId::new(chain),
                address: escrow_addr.to_string(),
                hd_path: format!("m/escrow/{}", escrow_addr),
            }),
            commission_plan: Some(CommissionRequirement {
                mode: CommissionMode::PercentBps,
                currency: otcd_core::CommissionCurrency::Asset,
                percent_bps: Some(bps),
                erc20_fixed_fee: None,
                usd_fixed: None,
                native_fixed: None,
                oracle_snapshot: None,
                covered_by_surplus: true,
            }),
            trade_locked_at: None,
            commission_locked_at: None,
        }
    }

    fn new_deal() -> Deal {
        Deal {
            id: DealId::new_random(),
            stage: Stage::Created,
            side_a: bare_side("alpha-utxo", "ALPHA", "10", "utxo1escrowA", 30),
            side_b: bare_side("evm-l1", "USDC", "50", "0xescrowB", 30),
            timeout_secs: 3600,
            expires_at: None,
            token_a: PersonalLinkToken::new_random(),
            token_b: PersonalLinkToken::new_random(),
            created_at: 0,
            closed_at: None,
            next_seq: Default::default(),
        }
    }

    fn setup() -> (StateDb, AdapterRegistry, AssetRegistry) {
        let db = temp_db(&format!("{:?}", std::thread::current().id()));
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(MockAdapter::new_utxo("alpha-utxo")));
        adapters.register(Arc::new(MockAdapter::new_account("evm-l1")));
        (db, adapters, registry())
    }

    #[tokio::test]
    async fn created_to_collection_sets_expiry() {
        let (db, adapters, reg) = setup();
        let configs = HashMap::new();
        let engine = DealEngine::new(&db, &adapters, &reg, &configs, "worker-1");
        let deal = new_deal();
        db.put_deal(&deal, None).unwrap();

        engine.process_deal(deal.id, 100).await.unwrap();
        let fetched = db.get_deal(deal.id).unwrap().unwrap();
        assert_eq!(fetched.stage, Stage::Collection);
        assert_eq!(fetched.expires_at, Some(3700));
    }

    #[tokio::test]
    async fn collection_past_expiry_reverts_with_refunds() {
        let (db, adapters, reg) = setup();
        let configs = HashMap::new();
        let engine = DealEngine::new(&db, &adapters, &reg, &configs, "worker-1");
        let mut deal = new_deal();
        deal.stage = Stage::Collection;
        deal.expires_at = Some(1000);
        db.put_deal(&deal, None).unwrap();

        let dep = otcd_core::EscrowDeposit {
            deal_id: deal.id,
            side: Side::A,
            txid: "tx1".to_string(),
            output_index: Some(0),
            chain: ChainId::new("alpha-utxo"),
            escrow_address: "utxo1escrowA".to_string(),
            asset: AssetCode::new("ALPHA"),
            amount: AssetAmount::from_str_exact("10.03").unwrap(),
            block_height: 1,
            block_time: 0,
            confirmations: 10,
            missed_polls: 0,
            refunded: false,
        };
        db.put_deposit(&dep).unwrap();

        engine.process_deal(deal.id, 1001).await.unwrap();
        let fetched = db.get_deal(deal.id).unwrap().unwrap();
        assert_eq!(fetched.stage, Stage::Reverted);
        assert!(fetched.expires_at.is_none());

        let items = db.iter_queue_items_for_deal(deal.id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].purpose, otcd_core::Purpose::TimeoutRefund);
    }

    #[tokio::test]
    async fn both_sides_locked_moves_to_waiting() {
        let (db, adapters, reg) = setup();
        let configs = HashMap::new();
        let engine = DealEngine::new(&db, &adapters, &reg, &configs, "worker-1");
        let mut deal = new_deal();
        deal.stage = Stage::Collection;
        deal.expires_at = Some(100_000);
        db.put_deal(&deal, None).unwrap();

        for (side, address, asset, amount) in [
            (Side::A, "utxo1escrowA", "ALPHA", "10.03"),
            (Side::B, "0xescrowB", "USDC", "50.151"),
        ] {
            let dep = otcd_core::EscrowDeposit {
                deal_id: deal.id,
                side,
                txid: format!("tx-{:?}", side),
                output_index: Some(0),
                chain: deal.side(side).chain.clone(),
                escrow_address: address.to_string(),
                asset: AssetCode::new(asset),
                amount: AssetAmount::from_str_exact(amount).unwrap(),
                block_height: 1,
                block_time: 0,
                confirmations: 10,
                missed_polls: 0,
                refunded: false,
            };
            db.put_deposit(&dep).unwrap();
        }

        engine.process_deal(deal.id, 10).await.unwrap();
        let fetched = db.get_deal(deal.id).unwrap().unwrap();
        assert_eq!(fetched.stage, Stage::Waiting);
        assert!(fetched.both_locked());
    }
}
