use thiserror::Error;

#[derive(Debug, Error)]
pub enum OtcError {
    // ── Deal lifecycle errors ────────────────────────────────────────────────
    #[error("unknown deal: {0}")]
    UnknownDeal(String),

    #[error("invalid stage transition: {from:?} -> {to:?}")]
    InvalidStageTransition { from: String, to: String },

    #[error("deal has expired (expiresAt={expires_at})")]
    DealExpired { expires_at: i64 },

    #[error("party details incomplete for side {0:?}")]
    PartyDetailsIncomplete(String),

    #[error("cancel only allowed in CREATED stage")]
    CancelNotAllowed,

    #[error("invalid personal link token")]
    InvalidToken,

    // ── Lease errors ─────────────────────────────────────────────────────────
    #[error("lease not held for deal {0}")]
    LeaseNotHeld(String),

    #[error("lease already held by another worker")]
    LeaseContended,

    // ── Deposit / lock errors ────────────────────────────────────────────────
    #[error("conflicting amount for deposit ({deal_id}, {txid}, {output_index:?})")]
    ConflictingDepositAmount {
        deal_id: String,
        txid: String,
        output_index: Option<u32>,
    },

    #[error("commission plan missing required field: {0}")]
    CommissionPlanIncomplete(String),

    // ── Queue / transfer-plan errors ─────────────────────────────────────────
    #[error("policy violation: cannot enqueue {attempted} while a non-terminal {conflict} exists for source {source}")]
    RefundPayoutConflict {
        attempted: String,
        conflict: String,
        source: String,
    },

    #[error("phase out of order: cannot submit phase {phase} item before phase {prior} is ready")]
    PhaseOutOfOrder { phase: u8, prior: u8 },

    #[error("queue item {0} has no matching account state")]
    MissingAccountState(String),

    #[error("queue item {0} exceeded max recovery attempts ({1})")]
    RecoveryAttemptsExhausted(String, u32),

    // ── Chain adapter errors (§4.4) ──────────────────────────────────────────
    #[error("transient network error: {0}")]
    TransientNetworkError(String),

    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: String, have: String },

    #[error("address format incompatible with chain {chain}: {address}")]
    AddressFormatIncompatible { chain: String, address: String },

    #[error("no spendable utxos available at {0}")]
    NoUtxosAvailable(String),

    #[error("transaction broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("unknown txid: {0}")]
    UnknownTxid(String),

    #[error("adapter not configured for chain: {0}")]
    UnknownChain(String),

    // ── Invariant violations (halt, do not auto-recover) ─────────────────────
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("swap-stage item stalled after exhausting retries; operator intervention required: {0}")]
    SwapStalled(String),

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    // ── General ───────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl From<bincode::Error> for OtcError {
    fn from(e: bincode::Error) -> Self {
        OtcError::Serialization(e.to_string())
    }
}
