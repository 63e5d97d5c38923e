//! Control-plane server wiring: the node-agent WebSocket endpoint plus
//! health and metrics routes. Domain HTTP handlers (admin, billing, users)
//! live in their own service layer, not here.

pub mod agent;
pub mod metrics;

use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::debug;

use orris_sync::{
    EventDispatcher, Hub, HubStatusEvent, HubStatusHandler, NodeRepository, TrafficAggregator,
    VersionOracle,
};

/// Shared server state.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub oracle: Arc<VersionOracle>,
    pub nodes: Arc<dyn NodeRepository>,
    pub aggregator: Arc<TrafficAggregator>,
    pub dispatcher: Arc<EventDispatcher>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/agent", get(agent::agent_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Logs peer-instance presence transitions received over the bus.
pub struct PresenceLogger;

#[async_trait]
impl HubStatusHandler for PresenceLogger {
    async fn handle(&self, event: HubStatusEvent) {
        debug!(?event, "peer hub status");
    }
}
