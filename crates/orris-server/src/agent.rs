//! Node-agent WebSocket endpoint.
//!
//! Agents authenticate with their node SID and access token, then hold one
//! socket over which the control plane pushes sync messages and the agent
//! reports traffic counters and version acks. The outbound direction is the
//! hub's bounded queue; a slow agent fails sends rather than backing up the
//! sync engines.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use orris_domain::{hash_token, Node};
use orris_sync::{DomainEvent, NodeConnection};

use crate::metrics;
use crate::AppState;

/// Outbound queue depth per agent connection.
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
pub struct AgentAuth {
    pub sid: String,
    pub token: String,
}

/// Frames an agent may send upstream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AgentFrame {
    TrafficReport { entries: Vec<TrafficReportEntry> },
    Ack { version: u64 },
}

#[derive(Debug, Deserialize)]
struct TrafficReportEntry {
    subscription_id: u64,
    upload: u64,
    download: u64,
}

pub async fn agent_ws(
    ws: WebSocketUpgrade,
    Query(auth): Query<AgentAuth>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let node = match state.nodes.get_by_sid(&auth.sid).await {
        Ok(Some(node)) => node,
        Ok(None) => {
            warn!(sid = %auth.sid, "agent connect for unknown node");
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            warn!(sid = %auth.sid, error = %e, "node lookup failed on agent connect");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if hash_token(&auth.token) != node.token_hash {
        warn!(sid = %auth.sid, "agent connect with bad token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_agent(socket, state, node))
}

async fn handle_agent(socket: WebSocket, state: Arc<AppState>, node: Node) {
    let agent_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_CAPACITY);

    state
        .hub
        .register(NodeConnection {
            node_id: node.id,
            node_sid: node.sid.clone(),
            node_name: node.name.clone(),
            agent_id,
            sender: tx,
        })
        .await;
    metrics::CONNECTED_NODES.inc();

    if let Err(e) = state
        .dispatcher
        .publish(DomainEvent::NodeConnected { node_id: node.id })
        .await
    {
        warn!(node_id = node.id, error = %e, "failed to publish connect event");
    }

    let (mut sink, mut stream) = socket.split();
    let outbound = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if sink.send(Message::Binary(bytes)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(&state, &node, text.as_bytes()),
            Ok(Message::Binary(bytes)) => handle_frame(&state, &node, &bytes),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    outbound.abort();
    state.hub.unregister(node.id).await;
    metrics::CONNECTED_NODES.dec();
    if let Err(e) = state
        .dispatcher
        .publish(DomainEvent::NodeDisconnected { node_id: node.id })
        .await
    {
        warn!(node_id = node.id, error = %e, "failed to publish disconnect event");
    }
}

fn handle_frame(state: &AppState, node: &Node, payload: &[u8]) {
    let frame: AgentFrame = match serde_json::from_slice(payload) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(node_id = node.id, error = %e, "unparseable agent frame");
            return;
        }
    };

    match frame {
        AgentFrame::TrafficReport { entries } => {
            metrics::AGENT_FRAMES_TOTAL
                .with_label_values(&["traffic_report"])
                .inc();
            for entry in entries {
                state.aggregator.add_traffic(
                    node.id,
                    entry.subscription_id,
                    entry.upload,
                    entry.download,
                );
            }
        }
        AgentFrame::Ack { version } => {
            metrics::AGENT_FRAMES_TOTAL.with_label_values(&["ack"]).inc();
            debug!(node_id = node.id, version, "agent acked version");
            state.oracle.set_ack(node.id, version);
        }
    }
}
