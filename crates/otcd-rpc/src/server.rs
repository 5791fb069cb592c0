//! JSON-RPC server implementation (§6 "External interfaces"). Splits a
//! shared `RpcServerState` from the `RpcServer` that binds it to a listen
//! address, behind a CORS-wrapped `jsonrpsee` startup sequence.

use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use otcd_chain::AdapterRegistry;
use otcd_core::{AssetRegistry, ChainConfig, Deal, DealEvent, DealId, PersonalLinkToken, Side};
use otcd_state::{DealEngine, StateDb};

use crate::api::OtcApiServer;
use crate::types::{
    RpcCollectionProgress, RpcCommissionPlan, RpcDealEvent, RpcDealStatus, RpcFillDetailsParams,
    RpcQueueItem,
};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

fn now_unix() -> otcd_core::Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as otcd_core::Timestamp)
        .unwrap_or(0)
}

/// Shared state passed to the RPC server. Owns no engine-tick loop of its
/// own; `fillDetails`/`cancel` run one-off engine calls directly, guarded by
/// the same lease mechanism the periodic tick loop uses.
pub struct RpcServerState {
    pub db: Arc<StateDb>,
    pub adapters: Arc<AdapterRegistry>,
    pub registry: Arc<AssetRegistry>,
    pub chain_configs: Arc<std::collections::HashMap<otcd_core::ChainId, ChainConfig>>,
    pub operator_id: String,
}

impl RpcServerState {
    fn engine(&self) -> DealEngine<'_> {
        DealEngine::new(
            &self.db,
            &self.adapters,
            &self.registry,
            &self.chain_configs,
            self.operator_id.clone(),
        )
    }
}

pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Starts the JSON-RPC server on `addr` with permissive CORS. Returns a
    /// handle the caller can use to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "otc rpc server started");
        Ok(handle)
    }
}

fn parse_deal_id(s: &str) -> RpcResult<DealId> {
    DealId::from_hex(s).map_err(|e| rpc_err(-32602, format!("invalid dealId: {e}")))
}

fn parse_token(s: &str) -> RpcResult<PersonalLinkToken> {
    PersonalLinkToken::from_hex(s).map_err(|e| rpc_err(-32602, format!("invalid token: {e}")))
}

fn side_progress(
    deal: &Deal,
    side: Side,
    db: &StateDb,
    adapters: &AdapterRegistry,
    registry: &AssetRegistry,
    expires_at: otcd_core::Timestamp,
) -> RpcResult<RpcCollectionProgress> {
    let deal_side = deal.side(side);
    let deposits = db
        .iter_deposits_for_side(deal.id, side)
        .map_err(|e| rpc_err(-32603, e.to_string()))?;
    let trade_deposits: Vec<_> = deposits
        .iter()
        .filter(|d| d.asset == deal_side.asset)
        .cloned()
        .collect();

    let collect_confirms = match deal_side.escrow {
        Some(ref escrow) => adapters
            .get(&escrow.chain)
            .map(|a| a.collect_confirms())
            .unwrap_or(0),
        None => 0,
    };
    let eligible = otcd_state::lock_eval::sum_eligible(&trade_deposits, collect_confirms, expires_at);

    Ok(RpcCollectionProgress {
        chain: deal_side.chain.to_string(),
        asset: deal_side.asset.to_string(),
        required_amount: deal_side.amount.to_string(),
        eligible_amount: eligible.to_string(),
        trade_locked: deal_side.trade_locked_at.is_some(),
        commission_locked: deal_side.commission_locked_at.is_some(),
        escrow_address: deal_side.escrow.as_ref().map(|e| e.address.clone()),
    })
}

#[async_trait]
impl OtcApiServer for RpcServer {
    async fn status(&self, deal_id: String) -> RpcResult<RpcDealStatus> {
        let id = parse_deal_id(&deal_id)?;
        let deal = self
            .state
            .db
            .get_deal(id)
            .map_err(|e| rpc_err(-32603, e.to_string()))?
            .ok_or_else(|| rpc_err(-32001, "unknown deal"))?;

        let expires_at = deal.expires_at.unwrap_or(i64::MAX);
        let collection_a = side_progress(&deal, Side::A, &self.state.db, &self.state.adapters, &self.state.registry, expires_at)?;
        let collection_b = side_progress(&deal, Side::B, &self.state.db, &self.state.adapters, &self.state.registry, expires_at)?;

        let commission_plan_a = deal.side_a.commission_plan.as_ref().map(commission_plan_view);
        let commission_plan_b = deal.side_b.commission_plan.as_ref().map(commission_plan_view);

        let items = self
            .state
            .db
            .iter_queue_items_for_deal(deal.id)
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        let transactions = items.iter().map(queue_item_view).collect();

        let events = self
            .state
            .db
            .iter_events_for_deal(deal.id)
            .map_err(|e| rpc_err(-32603, e.to_string()))?
            .iter()
            .map(event_view)
            .collect();

        Ok(RpcDealStatus {
            deal_id: deal.id.to_hex(),
            stage: format!("{:?}", deal.stage),
            expires_at: deal.expires_at,
            closed_at: deal.closed_at,
            instructions: instructions_for(&deal),
            collection_a,
            collection_b,
            commission_plan_a,
            commission_plan_b,
            transactions,
            events,
        })
    }

    async fn fill_details(&self, params: RpcFillDetailsParams) -> RpcResult<RpcDealStatus> {
        let id = parse_deal_id(&params.deal_id)?;
        let token = parse_token(&params.token)?;

        self.state
            .engine()
            .fill_details(
                id,
                token,
                params.payback_address,
                params.recipient_address,
                params.email,
                now_unix(),
            )
            .await
            .map_err(|e| rpc_err(-32602, e.to_string()))?;

        self.status(params.deal_id).await
    }

    async fn cancel(&self, deal_id: String, token: String) -> RpcResult<RpcDealStatus> {
        let id = parse_deal_id(&deal_id)?;
        let tok = parse_token(&token)?;

        self.state
            .engine()
            .cancel(id, tok, now_unix())
            .map_err(|e| rpc_err(-32602, e.to_string()))?;

        self.status(deal_id).await
    }
}

fn commission_plan_view(plan: &otcd_core::CommissionRequirement) -> RpcCommissionPlan {
    RpcCommissionPlan {
        mode: format!("{:?}", plan.mode),
        currency: format!("{:?}", plan.currency),
        percent_bps: plan.percent_bps,
        usd_fixed: plan.usd_fixed.clone(),
        native_fixed: plan.native_fixed.clone(),
    }
}

fn queue_item_view(item: &otcd_core::QueueItem) -> RpcQueueItem {
    RpcQueueItem {
        id: item.id.clone(),
        purpose: format!("{:?}", item.purpose),
        phase: item.phase.map(|p| p as u8),
        seq: item.seq,
        status: format!("{:?}", item.status),
        asset: item.asset.to_string(),
        amount: item.amount.to_string(),
        destination_address: item.destination_address.clone(),
        txid: item.submitted_tx.txid.clone(),
        confirmations: item.submitted_tx.confirmations,
        required_confirms: item.submitted_tx.required_confirms,
    }
}

fn event_view(event: &DealEvent) -> RpcDealEvent {
    let at = match event {
        DealEvent::StageTransition { at, .. } => Some(*at),
        DealEvent::SideLocked { at, .. } => Some(*at),
        _ => None,
    };
    let (kind, detail) = match event {
        DealEvent::StageTransition { from, to, .. } => {
            ("StageTransition".to_string(), format!("{:?} -> {:?}", from, to))
        }
        DealEvent::SideLocked { side, .. } => ("SideLocked".to_string(), format!("{:?}", side)),
        DealEvent::DepositObserved { side, txid, amount } => (
            "DepositObserved".to_string(),
            format!("{:?} {} {}", side, txid, amount),
        ),
        DealEvent::DepositVanished { side, txid } => {
            ("DepositVanished".to_string(), format!("{:?} {}", side, txid))
        }
        DealEvent::PlanBuilt { item_count } => ("PlanBuilt".to_string(), format!("{item_count} items")),
        DealEvent::QueueItemEnqueued { queue_item_id, purpose } => (
            "QueueItemEnqueued".to_string(),
            format!("{queue_item_id} ({purpose})"),
        ),
        DealEvent::QueueItemSubmitted { queue_item_id, txid } => (
            "QueueItemSubmitted".to_string(),
            format!("{queue_item_id} {txid}"),
        ),
        DealEvent::QueueItemCompleted { queue_item_id } => {
            ("QueueItemCompleted".to_string(), queue_item_id.clone())
        }
        DealEvent::QueueItemFailed { queue_item_id, reason } => (
            "QueueItemFailed".to_string(),
            format!("{queue_item_id}: {reason}"),
        ),
        DealEvent::LateDepositRefunded { side, txid } => (
            "LateDepositRefunded".to_string(),
            format!("{:?} {}", side, txid),
        ),
        DealEvent::OperatorNote { message } => ("OperatorNote".to_string(), message.clone()),
    };
    RpcDealEvent { at, kind, detail }
}

fn instructions_for(deal: &Deal) -> Vec<String> {
    let mut out = Vec::new();
    for (label, side) in [("A", Side::A), ("B", Side::B)] {
        if let Some(escrow) = &deal.side(side).escrow {
            out.push(format!(
                "side {label}: send {} {} to {}",
                deal.side(side).amount,
                deal.side(side).asset,
                escrow.address
            ));
        }
    }
    out
}
