use serde::{Deserialize, Serialize};

/// JSON view of one side's collection progress — eligible/observed sums
/// against the trade and commission requirements, surfaced by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCollectionProgress {
    pub chain: String,
    pub asset: String,
    pub required_amount: String,
    pub eligible_amount: String,
    pub trade_locked: bool,
    pub commission_locked: bool,
    pub escrow_address: Option<String>,
}

/// One outgoing transfer as surfaced by `status`'s `transactions[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcQueueItem {
    pub id: String,
    pub purpose: String,
    pub phase: Option<u8>,
    pub seq: u64,
    pub status: String,
    pub asset: String,
    pub amount: String,
    pub destination_address: String,
    pub txid: Option<String>,
    pub confirmations: u64,
    pub required_confirms: u64,
}

/// One audit-trail entry as surfaced by `status`'s `events[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcDealEvent {
    pub at: Option<i64>,
    pub kind: String,
    pub detail: String,
}

/// JSON view of a side's frozen commission plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCommissionPlan {
    pub mode: String,
    pub currency: String,
    pub percent_bps: Option<u32>,
    pub usd_fixed: Option<String>,
    pub native_fixed: Option<String>,
}

/// Full `status(dealId)` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcDealStatus {
    pub deal_id: String,
    pub stage: String,
    pub expires_at: Option<i64>,
    pub closed_at: Option<i64>,
    pub instructions: Vec<String>,
    pub collection_a: RpcCollectionProgress,
    pub collection_b: RpcCollectionProgress,
    pub commission_plan_a: Option<RpcCommissionPlan>,
    pub commission_plan_b: Option<RpcCommissionPlan>,
    pub transactions: Vec<RpcQueueItem>,
    pub events: Vec<RpcDealEvent>,
}

/// Parameters for `fillDetails`. `token` is the personal-link token that
/// identifies which side is being filled in — the party never needs to
/// know whether they are "A" or "B".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFillDetailsParams {
    pub deal_id: String,
    pub token: String,
    pub payback_address: String,
    pub recipient_address: String,
    pub email: Option<String>,
}
