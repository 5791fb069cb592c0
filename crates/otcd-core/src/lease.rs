use crate::types::{DealId, Timestamp};
use serde::{Deserialize, Serialize};

/// A short-lived exclusive-writer claim on a deal (§5). The holder is the
/// sole writer for that deal until `lease_until` elapses.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Lease {
    pub deal_id: DealId,
    pub owner_id: String,
    pub lease_until: Timestamp,
}

impl Lease {
    /// Acquire condition per §5: `leaseUntil < now OR ownerId = self`.
    pub fn acquirable_by(&self, owner_id: &str, now: Timestamp) -> bool {
        self.lease_until < now || self.owner_id == owner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_lease_acquirable_by_anyone() {
        let lease = Lease {
            deal_id: DealId::new_random(),
            owner_id: "worker-1".into(),
            lease_until: 100,
        };
        assert!(lease.acquirable_by("worker-2", 200));
    }

    #[test]
    fn active_lease_only_renewable_by_owner() {
        let lease = Lease {
            deal_id: DealId::new_random(),
            owner_id: "worker-1".into(),
            lease_until: 500,
        };
        assert!(lease.acquirable_by("worker-1", 200));
        assert!(!lease.acquirable_by("worker-2", 200));
    }
}
