use crate::asset::AssetCode;
use crate::chain::ChainId;
use crate::decimal::AssetAmount;
use crate::types::{DealId, Side, Timestamp};
use serde::{Deserialize, Serialize};

/// A confirmed deposit observed on chain. Unique under
/// `(dealId, txid, outputIndex)`. Never mutated except to update
/// `confirmations`; deleted if it disappears from chain history (reorg).
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct EscrowDeposit {
    pub deal_id: DealId,
    pub side: Side,
    pub txid: String,
    pub output_index: Option<u32>,
    pub chain: ChainId,
    pub escrow_address: String,
    pub asset: AssetCode,
    pub amount: AssetAmount,
    pub block_height: u64,
    pub block_time: Timestamp,
    pub confirmations: u64,

    /// Consecutive polls in which this deposit was below
    /// `collectConfirms` and absent from the adapter's response.  Reaching
    /// 2 is the reorg signal that deletes the row (§4.2).
    #[serde(default)]
    pub missed_polls: u32,

    /// Set once this deposit has been accounted for by a transfer plan
    /// (payout, commission, or surplus refund). A deposit observed while
    /// `refunded` is still false after the deal has closed is a *late*
    /// deposit (§4.1 "CLOSED -> CLOSED").
    #[serde(default)]
    pub refunded: bool,
}

impl EscrowDeposit {
    pub fn key(&self) -> (DealId, String, Option<u32>) {
        (self.deal_id, self.txid.clone(), self.output_index)
    }

    /// §4.2(a): eligible once `confirms >= collectConfirms(chain)`.
    pub fn meets_confirmation(&self, collect_confirms: u64) -> bool {
        self.confirmations >= collect_confirms
    }

    /// §4.2(b): included before timeout by block time, not observation
    /// time. `blockTime == expiresAt` counts; `expiresAt + 1` does not.
    pub fn included_before(&self, expires_at: Timestamp) -> bool {
        self.block_time <= expires_at
    }

    pub fn is_eligible(&self, collect_confirms: u64, expires_at: Timestamp) -> bool {
        self.meets_confirmation(collect_confirms) && self.included_before(expires_at)
    }
}
