//! Post-close late-deposit watcher (§4.1 "CLOSED -> CLOSED"). A deal stays
//! under watch for `LATE_DEPOSIT_WATCHER_SECS` after it closes; any deposit
//! that lands after settlement is refunded rather than left stranded in the
//! escrow. A scheduled action keyed off an elapsed-time predicate.

use otcd_core::{constants::LATE_DEPOSIT_WATCHER_SECS, AssetRegistry, Deal, DealEvent, OtcError, Side, Timestamp};
use otcd_chain::AdapterRegistry;
use tracing::info;

use crate::db::StateDb;
use crate::deposit_tracker::DepositTracker;
use crate::plan_builder;

pub struct LateDepositWatcher<'a> {
    db: &'a StateDb,
}

impl<'a> LateDepositWatcher<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    /// True while a closed deal is still inside its watch window.
    pub fn in_window(&self, closed_at: Timestamp, now: Timestamp) -> bool {
        now - closed_at <= LATE_DEPOSIT_WATCHER_SECS
    }

    /// Polls both sides once and enqueues a refund for any deposit observed
    /// after close that hasn't already been accounted for. No-op once the
    /// watch window has elapsed.
    pub async fn check(
        &self,
        deal: &mut Deal,
        now: Timestamp,
        adapters: &AdapterRegistry,
        registry: &AssetRegistry,
    ) -> Result<(), OtcError> {
        let Some(closed_at) = deal.closed_at else {
            return Ok(());
        };
        if !self.in_window(closed_at, now) {
            return Ok(());
        }

        let tracker = DepositTracker::new(self.db);
        for side in [Side::A, Side::B] {
            let Some(escrow) = deal.side(side).escrow.clone() else {
                continue;
            };
            let adapter = adapters.get(&escrow.chain)?;
            tracker.poll_side(deal, side, adapter.as_ref(), registry).await?;

            let deposits = self.db.iter_deposits_for_side(deal.id, side)?;
            for mut dep in deposits {
                if dep.refunded {
                    continue;
                }
                let item =
                    plan_builder::build_late_deposit_refund(deal, side, &dep, adapter.as_ref(), now)?;
                self.db.put_queue_item(&item)?;
                self.db.append_event(
                    deal.id,
                    &DealEvent::LateDepositRefunded {
                        side,
                        txid: dep.txid.clone(),
                    },
                )?;
                info!(deal_id = %deal.id, ?side, txid = %dep.txid, "late deposit refund enqueued");
                dep.refunded = true;
                self.db.put_deposit(&dep)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_closes_after_seven_days() {
        let db_dir = std::env::temp_dir().join("otcd_watcher_test_window");
        let _ = std::fs::remove_dir_all(&db_dir);
        let db = StateDb::open(&db_dir).unwrap();
        let watcher = LateDepositWatcher::new(&db);
        assert!(watcher.in_window(0, LATE_DEPOSIT_WATCHER_SECS));
        assert!(!watcher.in_window(0, LATE_DEPOSIT_WATCHER_SECS + 1));
    }
}
