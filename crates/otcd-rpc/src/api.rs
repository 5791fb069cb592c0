use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{RpcDealStatus, RpcFillDetailsParams};

/// OTC coordinator JSON-RPC 2.0 API. All methods are prefixed with "otc"
/// via `namespace = "otc"` (§6 "External interfaces").
#[rpc(server, namespace = "otc")]
pub trait OtcApi {
    /// Pure read of persisted truth: stage, deposits, queue items, events.
    #[method(name = "status")]
    async fn status(&self, deal_id: String) -> RpcResult<RpcDealStatus>;

    /// Writes one side's party details. If both sides are now complete the
    /// deal transitions CREATED -> COLLECTION under a lease taken by this
    /// call. `token` identifies the side without the caller needing to
    /// know whether they are party A or B.
    #[method(name = "fillDetails")]
    async fn fill_details(&self, params: RpcFillDetailsParams) -> RpcResult<RpcDealStatus>;

    /// Cancels a deal. Only allowed while still CREATED (no deposits have
    /// been observed yet, so no refunds are needed).
    #[method(name = "cancel")]
    async fn cancel(&self, deal_id: String, token: String) -> RpcResult<RpcDealStatus>;
}
