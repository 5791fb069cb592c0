use crate::asset::AssetCode;
use crate::chain::ChainId;
use crate::commission::CommissionRequirement;
use crate::decimal::AssetAmount;
use crate::types::{DealId, PersonalLinkToken, Seq, Side, Timestamp};
use serde::{Deserialize, Serialize};

/// §4.1 deal state machine. Forward-only except the single
/// `Waiting -> Collection` reorg-revert edge and the general `* -> Reverted`
/// timeout edge (invariant I1).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum Stage {
    Created,
    Collection,
    Waiting,
    Swap,
    Closed,
    Reverted,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Closed | Stage::Reverted)
    }
}

/// Party-specified routing, collected via `fillDetails`.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct PartyDetails {
    pub payback_address: Option<String>,
    pub recipient_address: Option<String>,
    pub email: Option<String>,
}

impl PartyDetails {
    pub fn is_complete(&self) -> bool {
        self.payback_address.is_some() && self.recipient_address.is_some()
    }
}

/// One half of a deal: the asset/amount/chain being deposited, plus the
/// frozen escrow reference and commission plan for that side.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct DealSide {
    pub chain: ChainId,
    pub asset: AssetCode,
    pub amount: AssetAmount,
    pub party: PartyDetails,
    pub escrow: Option<EscrowRef>,
    pub commission_plan: Option<CommissionRequirement>,

    /// Set once §4.2's lock predicate is satisfied; monotonic within a
    /// WAITING stage, cleared on `Waiting -> Collection` reversion.
    #[serde(default)]
    pub trade_locked_at: Option<Timestamp>,
    #[serde(default)]
    pub commission_locked_at: Option<Timestamp>,
}

impl DealSide {
    pub fn is_locked(&self) -> bool {
        self.trade_locked_at.is_some() && self.commission_locked_at.is_some()
    }

    pub fn clear_locks(&mut self) {
        self.trade_locked_at = None;
        self.commission_locked_at = None;
    }
}

/// Deterministic per-deal, per-side escrow account. `hd_path` is a pure
/// function of `(dealId, side, chain)` so it is recoverable from deal
/// metadata alone without a side-channel lookup.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct EscrowRef {
    pub chain: ChainId,
    pub address: String,
    pub hd_path: String,
}

/// Append-only audit trail entry. Surfaced verbatim by the `status` RPC
/// method's `events[]` field.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum DealEvent {
    StageTransition { from: Stage, to: Stage, at: Timestamp },
    SideLocked { side: Side, at: Timestamp },
    DepositObserved { side: Side, txid: String, amount: String },
    DepositVanished { side: Side, txid: String },
    PlanBuilt { item_count: usize },
    QueueItemEnqueued { queue_item_id: String, purpose: String },
    QueueItemSubmitted { queue_item_id: String, txid: String },
    QueueItemCompleted { queue_item_id: String },
    QueueItemFailed { queue_item_id: String, reason: String },
    LateDepositRefunded { side: Side, txid: String },
    OperatorNote { message: String },
}

/// The root entity. A deal is created once by `fillDetails`/creation and
/// never destroyed — terminal stages `Closed`/`Reverted` are retained for
/// audit and late-deposit handling.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Deal {
    pub id: DealId,
    pub stage: Stage,
    pub side_a: DealSide,
    pub side_b: DealSide,
    pub timeout_secs: i64,
    pub expires_at: Option<Timestamp>,
    pub token_a: PersonalLinkToken,
    pub token_b: PersonalLinkToken,
    pub created_at: Timestamp,

    /// Set on entry to `Closed` or `Reverted`. Anchors the 7-day
    /// late-deposit watcher window; `expires_at` cannot serve this role
    /// since it is cleared on entry to `Swap`/`Closed` (I2).
    #[serde(default)]
    pub closed_at: Option<Timestamp>,

    #[serde(default)]
    pub next_seq: std::collections::HashMap<String, Seq>,
}

impl Deal {
    pub fn side(&self, side: Side) -> &DealSide {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut DealSide {
        match side {
            Side::A => &mut self.side_a,
            Side::B => &mut self.side_b,
        }
    }

    pub fn both_parties_complete(&self) -> bool {
        self.side_a.party.is_complete() && self.side_b.party.is_complete()
    }

    pub fn both_escrows_generated(&self) -> bool {
        self.side_a.escrow.is_some() && self.side_b.escrow.is_some()
    }

    pub fn both_locked(&self) -> bool {
        self.side_a.is_locked() && self.side_b.is_locked()
    }

    /// Allocates the next monotonic `seq` for a `(dealId, sourceAddress)`
    /// pair and records the update in-place. Callers persist the returned
    /// value together with the deal row inside the same transaction.
    pub fn next_seq_for(&mut self, source_address: &str) -> Seq {
        let counter = self.next_seq.entry(source_address.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_side() -> DealSide {
        DealSide {
            chain: ChainId::new("evm-l1"),
            asset: AssetCode::new("USDC"),
            amount: AssetAmount::from_str_exact("50").unwrap(),
            party: PartyDetails::default(),
            escrow: None,
            commission_plan: None,
            trade_locked_at: None,
            commission_locked_at: None,
        }
    }

    #[test]
    fn side_not_locked_until_both_timestamps_set() {
        let mut s = bare_side();
        assert!(!s.is_locked());
        s.trade_locked_at = Some(100);
        assert!(!s.is_locked());
        s.commission_locked_at = Some(101);
        assert!(s.is_locked());
        s.clear_locks();
        assert!(!s.is_locked());
    }

    #[test]
    fn seq_allocation_is_monotonic_per_source() {
        let mut deal = Deal {
            id: DealId::new_random(),
            stage: Stage::Created,
            side_a: bare_side(),
            side_b: bare_side(),
            timeout_secs: 3600,
            expires_at: None,
            token_a: PersonalLinkToken::new_random(),
            token_b: PersonalLinkToken::new_random(),
            created_at: 0,
            closed_at: None,
            next_seq: Default::default(),
        };
        assert_eq!(deal.next_seq_for("addr1"), 1);
        assert_eq!(deal.next_seq_for("addr1"), 2);
        assert_eq!(deal.next_seq_for("addr2"), 1);
        assert_eq!(deal.next_seq_for("addr1"), 3);
    }
}
