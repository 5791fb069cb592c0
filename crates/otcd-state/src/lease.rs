//! Lease acquire/renew/release against persistence (§5 "Lease protocol").
//! A thin wrapper over `&StateDb` implementing a conditional
//! compare-and-swap write.

use otcd_core::{constants::LEASE_DURATION_SECS, DealId, Lease, OtcError, Timestamp};
use tracing::debug;

use crate::db::StateDb;

pub struct LeaseManager<'a> {
    db: &'a StateDb,
    owner_id: String,
}

impl<'a> LeaseManager<'a> {
    pub fn new(db: &'a StateDb, owner_id: impl Into<String>) -> Self {
        Self {
            db,
            owner_id: owner_id.into(),
        }
    }

    /// Attempts to acquire (or renew) the lease for `deal_id`. Succeeds iff
    /// `leaseUntil < now OR ownerId = self` (§5). The new `leaseUntil` is
    /// `now + LEASE_DURATION_SECS`.
    pub fn acquire(&self, deal_id: DealId, now: Timestamp) -> Result<bool, OtcError> {
        let existing = self.db.get_lease(deal_id)?;
        let acquirable = match &existing {
            None => true,
            Some(lease) => lease.acquirable_by(&self.owner_id, now),
        };
        if !acquirable {
            return Ok(false);
        }
        let lease = Lease {
            deal_id,
            owner_id: self.owner_id.clone(),
            lease_until: now + LEASE_DURATION_SECS,
        };
        self.db.put_lease(&lease)?;
        debug!(%deal_id, owner = %self.owner_id, lease_until = lease.lease_until, "lease acquired");
        Ok(true)
    }

    /// Extends a lease this worker already holds, without re-checking the
    /// acquire condition. Called mid-processing once a worker has held a
    /// lease past `LEASE_RENEW_AFTER_SECS` (§5).
    pub fn renew(&self, deal_id: DealId, now: Timestamp) -> Result<(), OtcError> {
        let Some(lease) = self.db.get_lease(deal_id)? else {
            return Err(OtcError::LeaseNotHeld(deal_id.to_string()));
        };
        if lease.owner_id != self.owner_id {
            return Err(OtcError::LeaseContended);
        }
        let renewed = Lease {
            deal_id,
            owner_id: self.owner_id.clone(),
            lease_until: now + LEASE_DURATION_SECS,
        };
        self.db.put_lease(&renewed)?;
        Ok(())
    }

    pub fn release(&self, deal_id: DealId) -> Result<(), OtcError> {
        if let Some(lease) = self.db.get_lease(deal_id)? {
            if lease.owner_id == self.owner_id {
                self.db.remove_lease(deal_id)?;
            }
        }
        Ok(())
    }

    /// Crash recovery (§7): release every lease this worker owned before a
    /// prior crash, so other workers can take the deals over immediately
    /// instead of waiting out the full `LEASE_DURATION_SECS` timeout.
    pub fn release_all_owned(&self) -> Result<usize, OtcError> {
        let owned = self.db.iter_leases_owned_by(&self.owner_id)?;
        for lease in &owned {
            self.db.remove_lease(lease.deal_id)?;
        }
        Ok(owned.len())
    }
}
