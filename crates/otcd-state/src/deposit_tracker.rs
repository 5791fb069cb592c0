//! Deposit reconciliation (§4.2, §4.1 "late deposit"). Polls a chain
//! adapter for confirmed deposits to one escrow address and reconciles the
//! result against persisted `EscrowDeposit` rows: a load-compare-write
//! cycle for externally observed facts.

use otcd_core::{AssetCode, AssetRegistry, ChainId, CommissionCurrency, Deal, DealEvent, DealId, EscrowDeposit, OtcError, Side};
use otcd_chain::ChainAdapter;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::db::StateDb;

/// Consecutive missed polls (while still below finality depth) before a
/// deposit is treated as reorged out and removed (§4.2 "reorg revert").
const MISSED_POLL_THRESHOLD: u32 = 2;

pub struct DepositTracker<'a> {
    db: &'a StateDb,
}

impl<'a> DepositTracker<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    /// Polls both the trade asset and, if distinct, the commission asset
    /// for one side of a deal and reconciles what comes back.
    pub async fn poll_side(
        &self,
        deal: &Deal,
        side: Side,
        adapter: &dyn ChainAdapter,
        registry: &AssetRegistry,
    ) -> Result<(), OtcError> {
        let deal_side = deal.side(side);
        let Some(escrow) = &deal_side.escrow else {
            return Ok(());
        };

        self.reconcile_asset(
            deal.id,
            side,
            &escrow.chain,
            &escrow.address,
            &deal_side.asset,
            adapter,
        )
        .await?;

        if let Some(commission) = &deal_side.commission_plan {
            if commission.currency == CommissionCurrency::Native {
                if let Some(native_asset) = registry.native_asset_for_chain(&escrow.chain) {
                    if native_asset != deal_side.asset {
                        self.reconcile_asset(
                            deal.id,
                            side,
                            &escrow.chain,
                            &escrow.address,
                            &native_asset,
                            adapter,
                        )
                        .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetches confirmed deposits for one `(escrow address, asset)` pair and
    /// merges them into persisted state:
    ///   - new deposit → insert
    ///   - existing deposit, same amount → update confirmations, reset
    ///     `missed_polls`
    ///   - existing deposit, different amount for the same `(txid,
    ///     outputIndex)` → `ConflictingDepositAmount` (never silently
    ///     overwritten, §7 error taxonomy)
    ///   - persisted deposit absent from this poll while still below
    ///     finality depth → increment `missed_polls`; once it reaches
    ///     `MISSED_POLL_THRESHOLD` the row is dropped (reorg) and a
    ///     `DepositVanished` event is recorded
    async fn reconcile_asset(
        &self,
        deal_id: DealId,
        side: Side,
        chain: &ChainId,
        address: &str,
        asset: &AssetCode,
        adapter: &dyn ChainAdapter,
    ) -> Result<(), OtcError> {
        let collect_confirms = adapter.collect_confirms();
        let observed = adapter
            .list_confirmed_deposits(asset, address, 0, None)
            .await?;

        let persisted = self.db.iter_deposits_for_side(deal_id, side)?;
        let mut persisted_for_asset: HashMap<(String, Option<u32>), EscrowDeposit> = HashMap::new();
        for d in persisted {
            if &d.asset == asset && &d.chain == chain {
                persisted_for_asset.insert((d.txid.clone(), d.output_index), d);
            }
        }

        let mut seen: HashSet<(String, Option<u32>)> = HashSet::new();

        for rec in &observed {
            let key = (rec.txid.clone(), rec.output_index);
            seen.insert(key.clone());

            match persisted_for_asset.get(&key) {
                Some(existing) => {
                    if existing.amount != rec.amount {
                        return Err(OtcError::ConflictingDepositAmount {
                            deal_id: deal_id.to_string(),
                            txid: rec.txid.clone(),
                            output_index: rec.output_index,
                        });
                    }
                    let mut updated = existing.clone();
                    updated.confirmations = rec.confirms;
                    updated.block_height = rec.block_height;
                    updated.missed_polls = 0;
                    self.db.put_deposit(&updated)?;
                }
                None => {
                    let deposit = EscrowDeposit {
                        deal_id,
                        side,
                        txid: rec.txid.clone(),
                        output_index: rec.output_index,
                        chain: chain.clone(),
                        escrow_address: address.to_string(),
                        asset: asset.clone(),
                        amount: rec.amount,
                        block_height: rec.block_height,
                        block_time: rec.block_time,
                        confirmations: rec.confirms,
                        missed_polls: 0,
                        refunded: false,
                    };
                    self.db.append_event(
                        deal_id,
                        &DealEvent::DepositObserved {
                            side,
                            txid: rec.txid.clone(),
                            amount: rec.amount.to_string(),
                        },
                    )?;
                    info!(%deal_id, ?side, txid = %rec.txid, "deposit observed");
                    self.db.put_deposit(&deposit)?;
                }
            }
        }

        for ((txid, output_index), existing) in persisted_for_asset {
            if seen.contains(&(txid.clone(), output_index)) {
                continue;
            }
            if existing.confirmations >= collect_confirms {
                // Already past finality depth; chains don't reorg this
                // deep, so treat a missing response as adapter noise.
                continue;
            }
            let missed = existing.missed_polls + 1;
            if missed >= MISSED_POLL_THRESHOLD {
                self.db.remove_deposit(deal_id, &txid, output_index)?;
                self.db.append_event(
                    deal_id,
                    &DealEvent::DepositVanished {
                        side,
                        txid: txid.clone(),
                    },
                )?;
                warn!(%deal_id, ?side, %txid, "deposit reorged out");
            } else {
                let mut updated = existing;
                updated.missed_polls = missed;
                self.db.put_deposit(&updated)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otcd_chain::{DepositRecord, MockAdapter};
    use otcd_core::AssetAmount;

    fn temp_db(name: &str) -> StateDb {
        let dir = std::env::temp_dir().join(format!("otcd_deptrack_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        StateDb::open(&dir).expect("open temp db")
    }

    fn record(txid: &str, amount: &str, confirms: u64) -> DepositRecord {
        DepositRecord {
            txid: txid.to_string(),
            output_index: Some(0),
            amount: AssetAmount::from_str_exact(amount).unwrap(),
            block_height: 100,
            block_time: 1000,
            confirms,
        }
    }

    #[tokio::test]
    async fn new_deposit_is_inserted() {
        let db = temp_db("new_insert");
        let tracker = DepositTracker::new(&db);
        let adapter = MockAdapter::new_utxo("alpha-utxo");
        adapter.push_deposit("addr1", record("tx1", "10", 10));
        let deal_id = DealId::new_random();
        tracker
            .reconcile_asset(
                deal_id,
                Side::A,
                &ChainId::new("alpha-utxo"),
                "addr1",
                &AssetCode::new("ALPHA"),
                &adapter,
            )
            .await
            .unwrap();

        let deposits = db.iter_deposits_for_side(deal_id, Side::A).unwrap();
        assert_eq!(deposits.len(), 1);
        assert_eq!(deposits[0].confirmations, 10);
    }

    #[tokio::test]
    async fn conflicting_amount_for_same_txid_errors() {
        let db = temp_db("conflict");
        let tracker = DepositTracker::new(&db);
        let adapter = MockAdapter::new_utxo("alpha-utxo");
        let deal_id = DealId::new_random();

        adapter.push_deposit("addr1", record("tx1", "10", 10));
        tracker
            .reconcile_asset(
                deal_id,
                Side::A,
                &ChainId::new("alpha-utxo"),
                "addr1",
                &AssetCode::new("ALPHA"),
                &adapter,
            )
            .await
            .unwrap();

        adapter.drop_deposit("addr1", "tx1");
        adapter.push_deposit("addr1", record("tx1", "11", 10));
        let err = tracker
            .reconcile_asset(
                deal_id,
                Side::A,
                &ChainId::new("alpha-utxo"),
                "addr1",
                &AssetCode::new("ALPHA"),
                &adapter,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OtcError::ConflictingDepositAmount { .. }));
    }

    #[tokio::test]
    async fn vanished_sub_finality_deposit_removed_after_two_misses() {
        let db = temp_db("vanish");
        let tracker = DepositTracker::new(&db);
        let adapter = MockAdapter::new_utxo("alpha-utxo");
        let deal_id = DealId::new_random();

        adapter.push_deposit("addr1", record("tx1", "10", 1));
        tracker
            .reconcile_asset(
                deal_id,
                Side::A,
                &ChainId::new("alpha-utxo"),
                "addr1",
                &AssetCode::new("ALPHA"),
                &adapter,
            )
            .await
            .unwrap();

        adapter.drop_deposit("addr1", "tx1");

        // First missed poll: still present, just below threshold.
        tracker
            .reconcile_asset(
                deal_id,
                Side::A,
                &ChainId::new("alpha-utxo"),
                "addr1",
                &AssetCode::new("ALPHA"),
                &adapter,
            )
            .await
            .unwrap();
        let deposits = db.iter_deposits_for_side(deal_id, Side::A).unwrap();
        assert_eq!(deposits.len(), 1);
        assert_eq!(deposits[0].missed_polls, 1);

        // Second consecutive miss: dropped.
        tracker
            .reconcile_asset(
                deal_id,
                Side::A,
                &ChainId::new("alpha-utxo"),
                "addr1",
                &AssetCode::new("ALPHA"),
                &adapter,
            )
            .await
            .unwrap();
        let deposits = db.iter_deposits_for_side(deal_id, Side::A).unwrap();
        assert!(deposits.is_empty());
    }
}
