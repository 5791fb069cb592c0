//! JSON-RPC surface for the OTC coordinator (§6 "External interfaces"):
//!
//! - `otc_status(dealId)` — read-only snapshot of a deal's progress.
//! - `otc_fillDetails(params)` — a party fills in its routing addresses.
//! - `otc_cancel(dealId, token)` — cancels a deal before any deposit lands.

pub mod api;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerState};
pub use types::{RpcDealStatus, RpcFillDetailsParams};
