use crate::asset::AssetCode;
use crate::chain::ChainId;
use crate::decimal::AssetAmount;
use crate::types::{DealId, Nonce, Seq, Timestamp, TxId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum Purpose {
    SwapPayout,
    OpCommission,
    SurplusRefund,
    TimeoutRefund,
    GasRefundToTank,
    BrokerSwap,
    BrokerRevert,
    BrokerRefund,
}

impl Purpose {
    /// UTXO phase this purpose belongs to, or `None` for purposes that
    /// don't participate in phase ordering (timeout refunds can only be
    /// enqueued once no payout-phase work is pending — invariant I6 — and
    /// gas-refund sweeps happen after everything else completes, so
    /// neither needs a phase slot of its own).
    pub fn phase(self) -> Option<Phase> {
        match self {
            Purpose::SwapPayout | Purpose::BrokerSwap => Some(Phase::Swap),
            Purpose::OpCommission => Some(Phase::Commission),
            Purpose::SurplusRefund | Purpose::BrokerRevert | Purpose::BrokerRefund => {
                Some(Phase::Refund)
            }
            Purpose::TimeoutRefund | Purpose::GasRefundToTank => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub enum Phase {
    Swap = 1,
    Commission = 2,
    Refund = 3,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum QueueStatus {
    Pending,
    Submitting,
    Submitted,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, QueueStatus::Submitting | QueueStatus::Submitted)
    }
}

/// Bookkeeping for an in-flight on-chain transaction.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct SubmittedTx {
    pub txid: Option<TxId>,
    pub submitted_at: Option<Timestamp>,
    pub nonce: Option<Nonce>,
    pub utxo_inputs: Vec<String>,
    pub confirmations: u64,
    pub required_confirms: u64,
}

/// Stuck-transaction recovery bookkeeping (§4.3 "Stuck-transaction
/// recovery").
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct RecoveryInfo {
    pub attempt_count: u32,
    pub last_fee_bump_at: Option<Timestamp>,
    pub last_gas_price: Option<String>,
    pub original_nonce: Option<Nonce>,
}

/// A planned or in-flight outgoing transfer.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct QueueItem {
    pub id: String,
    pub deal_id: DealId,
    pub chain: ChainId,
    pub source_address: String,
    pub destination_address: String,
    pub asset: AssetCode,
    pub amount: AssetAmount,
    pub purpose: Purpose,
    pub phase: Option<Phase>,
    pub seq: Seq,
    pub status: QueueStatus,
    pub submitted_tx: SubmittedTx,
    pub recovery: RecoveryInfo,
    pub created_at: Timestamp,
    pub last_error: Option<String>,
}

impl QueueItem {
    pub fn source_key(&self) -> (crate::types::DealId, String) {
        (self.deal_id, self.source_address.clone())
    }
}
