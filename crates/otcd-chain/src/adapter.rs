//! The chain-adapter contract (§4.4). One implementation per supported
//! chain family (UTXO, account/EVM) behind a uniform async trait, so the
//! engine never branches on chain family except through `ChainFamily`
//! itself (used only for UTXO phase ordering / account nonce
//! serialization in `otcd-state::queue_processor`).

use async_trait::async_trait;
use otcd_core::{AssetAmount, AssetCode, DealId, OracleSnapshot, OtcError, Side, Timestamp};
use serde::{Deserialize, Serialize};

/// One confirmed deposit as reported by `listConfirmedDeposits`.
#[derive(Clone, Debug)]
pub struct DepositRecord {
    pub txid: String,
    pub output_index: Option<u32>,
    pub amount: AssetAmount,
    pub block_height: u64,
    pub block_time: Timestamp,
    pub confirms: u64,
}

/// Result of `send`. `nonce_or_inputs` distinguishes account-chain nonce
/// assignment from UTXO input selection without the engine caring which.
#[derive(Clone, Debug)]
pub struct SendResult {
    pub txid: String,
    pub submitted_at: Timestamp,
    pub nonce: Option<u64>,
    pub utxo_inputs: Vec<String>,
}

/// `getTxConfirmations` result: a chain can't always say "0" vs "I have no
/// idea what this tx is" — the engine treats those very differently (the
/// latter triggers stuck-tx recovery after the dropped-tx grace window).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Confirmed(u64),
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowHandle {
    pub address: String,
    pub hd_path: String,
}

#[derive(Clone, Debug)]
pub struct UsdQuote {
    pub native_amount: AssetAmount,
    pub snapshot: OracleSnapshot,
}

/// Intent passed to `ensure_fee_budget`, distinguishing "I'm about to pay
/// out" from "I'm about to sweep gas back to the tank" so an adapter can
/// decide how aggressively to top up.
#[derive(Clone, Copy, Debug)]
pub enum FeeIntent {
    Payout,
    Sweep,
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> &otcd_core::ChainId;

    fn family(&self) -> otcd_core::ChainFamily;

    fn validate_address(&self, address: &str) -> bool;

    /// Derives a deterministic per-deal, per-side escrow. The HD path is a
    /// pure function of `(dealId, side, chain)` (§9) — calling this twice
    /// with the same inputs must return the same handle.
    fn generate_escrow(&self, asset: &AssetCode, deal_id: DealId, side: Side) -> EscrowHandle;

    async fn list_confirmed_deposits(
        &self,
        asset: &AssetCode,
        address: &str,
        min_conf: u64,
        since: Option<Timestamp>,
    ) -> Result<Vec<DepositRecord>, OtcError>;

    async fn send(
        &self,
        asset: &AssetCode,
        from_escrow: &str,
        to_address: &str,
        amount: AssetAmount,
    ) -> Result<SendResult, OtcError>;

    async fn get_tx_confirmations(&self, txid: &str) -> Result<ConfirmationStatus, OtcError>;

    /// May no-op on chains without a separate gas concept (UTXO chains).
    async fn ensure_fee_budget(
        &self,
        from_escrow: &str,
        asset: &AssetCode,
        intent: FeeIntent,
        min_native: AssetAmount,
    ) -> Result<(), OtcError>;

    async fn quote_native_for_usd(&self, usd: AssetAmount) -> Result<UsdQuote, OtcError>;

    /// Native-currency balance currently held at `address`. Backs the
    /// post-completion gas-refund-to-tank sweep (EVM only); UTXO adapters
    /// have no separate gas concept and report zero.
    async fn native_balance(&self, address: &str) -> Result<AssetAmount, OtcError>;

    fn operator_address(&self) -> String;

    fn collect_confirms(&self) -> u64;

    fn required_confirms(&self) -> u64;
}
