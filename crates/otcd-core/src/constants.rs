//! ─── Protocol constants ──────────────────────────────────────────────────────
//!
//! Timing and threshold defaults. Per-chain values here are fallbacks used by
//! the demo registry and tests; production deployments override them via the
//! node's chain config (see `otcd-chain::registry`).

// ── Engine tick / lease timing ────────────────────────────────────────────────

/// Engine tick interval (§5 "Engine tick").
pub const ENGINE_TICK_SECS: u64 = 30;

/// Queue processor tick interval — independent loop, same cadence.
pub const QUEUE_TICK_SECS: u64 = 30;

/// Lease duration granted on acquire/renew.
pub const LEASE_DURATION_SECS: i64 = 90;

/// A worker extends its lease mid-processing once it has held it this long.
pub const LEASE_RENEW_AFTER_SECS: i64 = 60;

// ── Confirmation thresholds (collectConfirms per chain family) ───────────────

pub const COLLECT_CONFIRMS_UTXO: u64 = 6;
pub const COLLECT_CONFIRMS_EVM_L1: u64 = 3;
pub const COLLECT_CONFIRMS_POLYGON: u64 = 64;

// ── Stuck-transaction recovery ────────────────────────────────────────────────

/// Seconds a SUBMITTED item may show zero confirmations before the processor
/// rebroadcasts with a bumped fee (EVM default; UTXO chains typically use a
/// longer window since block times are longer).
pub const RECOVERY_AFTER_SECS_EVM: i64 = 300;
pub const RECOVERY_AFTER_SECS_UTXO: i64 = 1_800;

pub const MAX_RECOVERY_ATTEMPTS: u32 = 5;

// ── Late-deposit watcher ──────────────────────────────────────────────────────

/// Window after CLOSED/REVERTED during which a late confirmed deposit still
/// triggers an automatic refund (§4.1 "CLOSED -> CLOSED").
pub const LATE_DEPOSIT_WATCHER_SECS: i64 = 7 * 24 * 3600;

// ── Misc ───────────────────────────────────────────────────────────────────────

/// Default deal timeout if not otherwise configured.
pub const DEFAULT_DEAL_TIMEOUT_SECS: i64 = 3600;

/// Minimum native currency an escrow must hold for the adapter to attempt a
/// gas top-up before declaring insufficient funds.
pub const MIN_GAS_TOPUP_NATIVE_UNITS: &str = "0.002";
