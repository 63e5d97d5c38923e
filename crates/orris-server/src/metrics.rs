//! Prometheus metrics and the /metrics exporter endpoint.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};
use tracing::error;

lazy_static! {
    /// Currently connected node agents
    pub static ref CONNECTED_NODES: IntGauge = register_int_gauge!(
        "orris_connected_nodes",
        "Currently connected node agents"
    )
    .unwrap();

    /// Inbound agent frames by type
    pub static ref AGENT_FRAMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "orris_agent_frames_total",
        "Inbound agent frames by type",
        &["type"]
    )
    .unwrap();
}

/// Serve the default registry in the Prometheus text format.
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {:?}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
