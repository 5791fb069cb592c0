//! Crash/restart reconciliation (§7 "Crash recovery"). Run once per
//! worker at startup, before the engine or queue-processor ticks begin.

use otcd_core::{DealId, OtcError, QueueStatus, Timestamp};
use otcd_chain::{AdapterRegistry, ConfirmationStatus};
use tracing::{info, warn};

use crate::db::StateDb;
use crate::lease::LeaseManager;

pub struct CrashRecovery<'a> {
    db: &'a StateDb,
    adapters: &'a AdapterRegistry,
}

pub struct RecoveryReport {
    pub leases_released: usize,
    pub items_confirmed: usize,
    pub items_rolled_back: usize,
}

impl<'a> CrashRecovery<'a> {
    pub fn new(db: &'a StateDb, adapters: &'a AdapterRegistry) -> Self {
        Self { db, adapters }
    }

    /// (a) releases leases this worker owned before a prior crash; (b)
    /// reconciles every queue item left in SUBMITTING/SUBMITTED.
    pub async fn run(&self, owner_id: &str, now: Timestamp) -> Result<RecoveryReport, OtcError> {
        let lease_mgr = LeaseManager::new(self.db, owner_id);
        let leases_released = lease_mgr.release_all_owned()?;
        if leases_released > 0 {
            info!(owner_id, leases_released, "released leases held before crash");
        }

        let mut items_confirmed = 0;
        let mut items_rolled_back = 0;
        for deal_id in self.db.iter_active_deals()? {
            let (confirmed, rolled_back) = self.reconcile_deal(deal_id, now).await?;
            items_confirmed += confirmed;
            items_rolled_back += rolled_back;
        }

        Ok(RecoveryReport {
            leases_released,
            items_confirmed,
            items_rolled_back,
        })
    }

    async fn reconcile_deal(&self, deal_id: DealId, _now: Timestamp) -> Result<(usize, usize), OtcError> {
        let mut confirmed = 0;
        let mut rolled_back = 0;
        let items = self.db.iter_queue_items_for_deal(deal_id)?;

        for mut item in items {
            if item.status != QueueStatus::Submitting && item.status != QueueStatus::Submitted {
                continue;
            }

            let Some(txid) = item.submitted_tx.txid.clone() else {
                // Crashed between the PENDING -> SUBMITTING write and a
                // successful `send()` acknowledgement: no txid was ever
                // assigned, so there is nothing on chain to look up by.
                // Roll back to PENDING exactly as if submission never
                // started, releasing the nonce it may have reserved.
                self.rollback_to_pending(&mut item).await?;
                rolled_back += 1;
                continue;
            };

            let adapter = self.adapters.get(&item.chain)?;
            match adapter.get_tx_confirmations(&txid).await {
                Ok(ConfirmationStatus::Confirmed(confs)) => {
                    item.submitted_tx.confirmations = confs;
                    item.status = if confs >= adapter.required_confirms() {
                        QueueStatus::Completed
                    } else {
                        QueueStatus::Submitted
                    };
                    self.db.put_queue_item(&item)?;
                    info!(item_id = %item.id, %txid, confs, "recovered submitted item confirmed on chain");
                    confirmed += 1;
                }
                Ok(ConfirmationStatus::Unknown) => {
                    warn!(item_id = %item.id, %txid, "submitted tx not found on chain, rolling back");
                    self.rollback_to_pending(&mut item).await?;
                    rolled_back += 1;
                }
                Err(e) => {
                    // Adapter itself is unreachable; leave the item as-is,
                    // the next queue-processor tick will retry the watch.
                    warn!(item_id = %item.id, %txid, error = %e, "recovery confirmation check failed, deferring");
                }
            }
        }
        Ok((confirmed, rolled_back))
    }

    async fn rollback_to_pending(&self, item: &mut otcd_core::QueueItem) -> Result<(), OtcError> {
        if let Some(nonce) = item.submitted_tx.nonce {
            if let Some(mut account) = self.db.get_account_state(&item.chain, &item.source_address)? {
                if account.rollback_if_latest(nonce) {
                    self.db.put_account_state(&account)?;
                }
            }
        }
        item.status = QueueStatus::Pending;
        item.submitted_tx = Default::default();
        self.db.put_queue_item(item)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otcd_chain::MockAdapter;
    use otcd_core::{
        AssetAmount, AssetCode, ChainId, Nonce, Purpose, QueueItem, QueueStatus, SubmittedTx,
    };
    use std::sync::Arc;

    fn temp_db(name: &str) -> StateDb {
        let dir = std::env::temp_dir().join(format!("otcd_recovery_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        StateDb::open(&dir).expect("open temp db")
    }

    fn bare_item(deal_id: DealId, status: QueueStatus, txid: Option<&str>, nonce: Option<Nonce>) -> QueueItem {
        QueueItem {
            id: format!("{}-item", deal_id),
            deal_id,
            chain: ChainId::new("evm-l1"),
            source_address: "0xescrow".to_string(),
            destination_address: "0xrecipient".to_string(),
            asset: AssetCode::new("USDC"),
            amount: AssetAmount::from_str_exact("50").unwrap(),
            purpose: Purpose::SwapPayout,
            phase: Some(otcd_core::Phase::Swap),
            seq: 1,
            status,
            submitted_tx: SubmittedTx {
                txid: txid.map(|s| s.to_string()),
                submitted_at: Some(0),
                nonce,
                utxo_inputs: Vec::new(),
                confirmations: 0,
                required_confirms: 3,
            },
            recovery: Default::default(),
            created_at: 0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn submitting_without_txid_rolls_back_and_frees_nonce() {
        let db = temp_db("no_txid");
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(MockAdapter::new_account("evm-l1")));
        let deal_id = DealId::new_random();

        let mut account = otcd_core::AccountState::new(ChainId::new("evm-l1"), "0xescrow".to_string());
        account.next_nonce(); // 0
        db.put_account_state(&account).unwrap();

        let item = bare_item(deal_id, QueueStatus::Submitting, None, Some(0));
        db.put_queue_item(&item).unwrap();
        db.put_deal(&test_deal(deal_id), None).unwrap();

        let recovery = CrashRecovery::new(&db, &adapters);
        let report = recovery.run("worker-1", 100).await.unwrap();
        assert_eq!(report.items_rolled_back, 1);

        let restored = db.get_queue_item(&item.id).unwrap().unwrap();
        assert_eq!(restored.status, QueueStatus::Pending);
        assert!(restored.submitted_tx.txid.is_none());

        let acct = db.get_account_state(&ChainId::new("evm-l1"), "0xescrow").unwrap().unwrap();
        assert_eq!(acct.last_used_nonce, None);
    }

    #[tokio::test]
    async fn submitted_unknown_tx_rolls_back() {
        let db = temp_db("unknown_tx");
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(MockAdapter::new_account("evm-l1")));
        let deal_id = DealId::new_random();

        let item = bare_item(deal_id, QueueStatus::Submitted, Some("ghost-tx"), Some(0));
        db.put_queue_item(&item).unwrap();
        db.put_deal(&test_deal(deal_id), None).unwrap();

        let recovery = CrashRecovery::new(&db, &adapters);
        let report = recovery.run("worker-1", 100).await.unwrap();
        assert_eq!(report.items_rolled_back, 1);

        let restored = db.get_queue_item(&item.id).unwrap().unwrap();
        assert_eq!(restored.status, QueueStatus::Pending);
    }

    fn test_deal(deal_id: DealId) -> otcd_core::Deal {
        use otcd_core::{Deal, DealSide, PartyDetails, PersonalLinkToken, Stage};
        otcd_core::Deal {
            id: deal_id,
            stage: Stage::Swap,
            side_a: DealSide {
                chain: ChainId::new("evm-l1"),
                asset: AssetCode::new("USDC"),
                amount: AssetAmount::from_str_exact("50").unwrap(),
                party: PartyDetails::default(),
                escrow: None,
                commission_plan: None,
                trade_locked_at: None,
                commission_locked_at: None,
            },
            side_b: DealSide {
                chain: ChainId::new("evm-l1"),
                asset: AssetCode::new("USDC"),
                amount: AssetAmount::from_str_exact("50").unwrap(),
                party: PartyDetails::default(),
                escrow: None,
                commission_plan: None,
                trade_locked_at: None,
                commission_locked_at: None,
            },
            timeout_secs: 3600,
            expires_at: None,
            token_a: PersonalLinkToken::new_random(),
            token_b: PersonalLinkToken::new_random(),
            created_at: 0,
            closed_at: None,
            next_seq: Default::default(),
        }
    }
}
