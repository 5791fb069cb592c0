//! otcd-node — the OTC coordinator node binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the state database
//!   2. Run crash recovery (§7)
//!   3. Seed a demo deal if the database is empty and `--demo` was passed
//!   4. Start the JSON-RPC 2.0 server
//!   5. Run the engine tick loop and the queue-processor tick loop

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use otcd_chain::{AdapterRegistry, MockAdapter};
use otcd_core::asset::DEMO_REGISTRY;
use otcd_core::constants::{DEFAULT_DEAL_TIMEOUT_SECS, ENGINE_TICK_SECS, QUEUE_TICK_SECS};
use otcd_core::{
    AssetAmount, AssetCode, ChainConfig, ChainId, Deal, DealSide, PartyDetails, PersonalLinkToken,
    Stage,
};
use otcd_rpc::{RpcServer, RpcServerState};
use otcd_state::{DealEngine, QueueProcessor, StateDb};

#[derive(Parser, Debug)]
#[command(
    name = "otcd-node",
    version,
    about = "OTC cross-chain escrow and settlement coordinator"
)]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.otcd/data")]
    data_dir: PathBuf,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8645")]
    rpc_addr: SocketAddr,

    /// This worker's lease owner id. Must be unique per running process
    /// if more than one worker shares the same database.
    #[arg(long, default_value = "otcd-node-1")]
    operator_id: String,

    /// Path to a JSON file mapping chain id -> `ChainConfig` (broker
    /// contract, gas tank address). Omit to run with no broker contracts
    /// configured (the plan builder falls back to the phased queue for
    /// every side).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seeds one demo deal (ALPHA/alpha-utxo vs USDC/evm-l1, against the
    /// in-memory mock adapters) on first startup and logs its personal
    /// link tokens, for local exercising without a separate deal-creation
    /// collaborator service.
    #[arg(long, default_value_t = false)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,otcd=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("otcd-node starting");

    // ── State database ────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(StateDb::open(&data_dir).context("opening state database")?);

    // ── Chain adapters ───────────────────────────────────────────────────
    // No pluggable real-chain adapter exists in this workspace; the node
    // runs against the deterministic mock adapters the demo registry's
    // chain ids name.
    let mut adapter_registry = AdapterRegistry::new();
    adapter_registry.register(Arc::new(MockAdapter::new_utxo("alpha-utxo")));
    adapter_registry.register(Arc::new(MockAdapter::new_account("evm-l1")));
    let adapters = Arc::new(adapter_registry);

    let registry = Arc::new(if args.demo {
        clone_demo_registry()
    } else {
        otcd_core::AssetRegistry::new()
    });

    let chain_configs: Arc<HashMap<ChainId, ChainConfig>> =
        Arc::new(load_chain_configs(args.config.as_deref())?);

    // ── Crash recovery (§7) ──────────────────────────────────────────────
    let now = chrono::Utc::now().timestamp();
    let report = otcd_state::CrashRecovery::new(&db, &adapters)
        .run(&args.operator_id, now)
        .await
        .context("running crash recovery")?;
    info!(
        leases_released = report.leases_released,
        items_confirmed = report.items_confirmed,
        items_rolled_back = report.items_rolled_back,
        "crash recovery complete"
    );

    // ── Demo seed ─────────────────────────────────────────────────────────
    if args.demo && db.count_deals() == 0 {
        seed_demo_deal(&db, now)?;
    }

    // ── RPC server ────────────────────────────────────────────────────────
    let rpc_state = Arc::new(RpcServerState {
        db: Arc::clone(&db),
        adapters: Arc::clone(&adapters),
        registry: Arc::clone(&registry),
        chain_configs: Arc::clone(&chain_configs),
        operator_id: args.operator_id.clone(),
    });
    let _rpc_handle = RpcServer::new(rpc_state)
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    // ── Engine tick loop ──────────────────────────────────────────────────
    let engine_db = Arc::clone(&db);
    let engine_adapters = Arc::clone(&adapters);
    let engine_registry = Arc::clone(&registry);
    let engine_chain_configs = Arc::clone(&chain_configs);
    let engine_operator_id = args.operator_id.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(ENGINE_TICK_SECS));
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            let engine = DealEngine::new(
                &engine_db,
                &engine_adapters,
                &engine_registry,
                &engine_chain_configs,
                engine_operator_id.clone(),
            );
            if let Err(e) = engine.tick(now).await {
                warn!(error = %e, "engine tick failed");
            }
        }
    });

    // ── Queue processor tick loop ─────────────────────────────────────────
    let queue_db = Arc::clone(&db);
    let queue_adapters = Arc::clone(&adapters);
    let queue_operator_id = args.operator_id.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(QUEUE_TICK_SECS));
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            let processor = QueueProcessor::new(&queue_db, &queue_adapters);
            if let Err(e) = processor.tick(&queue_operator_id, now).await {
                warn!(error = %e, "queue processor tick failed");
            }
        }
    });

    info!(addr = %args.rpc_addr, "otcd-node ready");
    std::future::pending::<()>().await;
    Ok(())
}

/// Loads per-chain `ChainConfig` from a JSON file (chain id -> config).
/// An optional typed config surface rather than hardcoded values, without
/// implementing a general config-loading service.
fn load_chain_configs(path: Option<&Path>) -> anyhow::Result<HashMap<ChainId, ChainConfig>> {
    let Some(path) = path else {
        return Ok(HashMap::new());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading chain config from {}", path.display()))?;
    serde_json::from_str(&json).context("parsing chain config JSON")
}

fn clone_demo_registry() -> otcd_core::AssetRegistry {
    // `AssetRegistry` has no `Clone`; rebuild the same entries the static
    // demo table carries so the node keeps its own independent instance.
    let mut r = otcd_core::AssetRegistry::new();
    for code in ["ALPHA", "USDC", "ETH"] {
        let asset = AssetCode::new(code);
        if let Some(info) = DEMO_REGISTRY.get(&asset) {
            r.register(asset, info.clone());
        }
    }
    r
}

/// Seeds one CREATED deal (ALPHA on `alpha-utxo` for side A, USDC on
/// `evm-l1` for side B) with neither side's party details filled in yet.
/// Logs the two personal-link tokens `fillDetails` calls would need, since
/// deal creation itself is an external collaborator this node does not
/// expose over RPC.
fn seed_demo_deal(db: &StateDb, now: i64) -> anyhow::Result<()> {
    let deal = Deal {
        id: otcd_core::DealId::new_random(),
        stage: Stage::Created,
        side_a: DealSide {
            chain: ChainId::new("alpha-utxo"),
            asset: AssetCode::new("ALPHA"),
            amount: AssetAmount::from_str_exact("10").context("building demo amount")?,
            party: PartyDetails::default(),
            escrow: None,
            commission_plan: None,
            trade_locked_at: None,
            commission_locked_at: None,
        },
        side_b: DealSide {
            chain: ChainId::new("evm-l1"),
            asset: AssetCode::new("USDC"),
            amount: AssetAmount::from_str_exact("500").context("building demo amount")?,
            party: PartyDetails::default(),
            escrow: None,
            commission_plan: None,
            trade_locked_at: None,
            commission_locked_at: None,
        },
        timeout_secs: DEFAULT_DEAL_TIMEOUT_SECS,
        expires_at: None,
        token_a: PersonalLinkToken::new_random(),
        token_b: PersonalLinkToken::new_random(),
        created_at: now,
        closed_at: None,
        next_seq: Default::default(),
    };

    info!(
        deal_id = %deal.id.to_hex(),
        token_a = %deal.token_a.to_hex(),
        token_b = %deal.token_b.to_hex(),
        "seeded demo deal"
    );
    db.put_deal(&deal, None).context("persisting demo deal")?;
    Ok(())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
