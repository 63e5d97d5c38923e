//! Registry of currently connected node agents.
//!
//! The hub is the authority for online/offline transitions and the only
//! send-to-node primitive. Sends are best-effort and non-blocking: each
//! connection has a bounded outbound queue drained by its transport task,
//! and a full queue fails the send rather than stalling the caller. Higher
//! layers never retry synchronously; the full sync on reconnect recovers.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::events::HubStatusEvent;
use crate::ports::EventPublisher;

/// A live agent connection for one node.
#[derive(Debug, Clone)]
pub struct NodeConnection {
    pub node_id: u64,
    pub node_sid: String,
    pub node_name: String,
    /// Identity of the agent process holding the connection.
    pub agent_id: String,
    pub sender: mpsc::Sender<Vec<u8>>,
}

pub struct Hub {
    connections: DashMap<u64, NodeConnection>,
    instance_id: String,
    publisher: Arc<dyn EventPublisher>,
}

impl Hub {
    pub fn new(instance_id: String, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            connections: DashMap::new(),
            instance_id,
            publisher,
        }
    }

    pub fn is_node_online(&self, node_id: u64) -> bool {
        self.connections.contains_key(&node_id)
    }

    pub fn online_node_ids(&self) -> Vec<u64> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    /// Queue a message for the node. `NodeOffline` when no connection is
    /// registered; `SendFailed` when the outbound queue is full or the
    /// transport already closed.
    pub fn send_message(&self, node_id: u64, bytes: Vec<u8>) -> Result<(), SyncError> {
        let connection = self
            .connections
            .get(&node_id)
            .ok_or(SyncError::NodeOffline(node_id))?;
        connection
            .sender
            .try_send(bytes)
            .map_err(|_| SyncError::SendFailed(node_id))
    }

    /// Register a connection, replacing any stale one for the same node,
    /// and announce the transition on the status channel. Publish failures
    /// are logged and swallowed; presence is authoritative locally.
    pub async fn register(&self, connection: NodeConnection) {
        let node_id = connection.node_id;
        let node_sid = connection.node_sid.clone();
        let node_name = connection.node_name.clone();
        let agent_id = connection.agent_id.clone();

        if self.connections.insert(node_id, connection).is_some() {
            warn!(node_id, "replaced stale connection for node");
        }
        info!(node_id, node_sid = %node_sid, "node online");

        let timestamp = Utc::now().timestamp();
        self.publish_status(HubStatusEvent::AgentOnline {
            agent_id,
            agent_sid: node_sid.clone(),
            agent_name: node_name.clone(),
            timestamp,
            instance_id: self.instance_id.clone(),
        })
        .await;
        self.publish_status(HubStatusEvent::NodeOnline {
            node_id,
            node_sid,
            node_name,
            timestamp,
            instance_id: self.instance_id.clone(),
        })
        .await;
    }

    /// Remove a node's connection and announce the transition. A no-op when
    /// the node is not registered.
    pub async fn unregister(&self, node_id: u64) {
        let Some((_, connection)) = self.connections.remove(&node_id) else {
            return;
        };
        info!(node_id, node_sid = %connection.node_sid, "node offline");

        let timestamp = Utc::now().timestamp();
        self.publish_status(HubStatusEvent::AgentOffline {
            agent_id: connection.agent_id,
            agent_sid: connection.node_sid.clone(),
            agent_name: connection.node_name.clone(),
            timestamp,
            instance_id: self.instance_id.clone(),
        })
        .await;
        self.publish_status(HubStatusEvent::NodeOffline {
            node_id,
            node_sid: connection.node_sid,
            node_name: connection.node_name,
            timestamp,
            instance_id: self.instance_id.clone(),
        })
        .await;
    }

    async fn publish_status(&self, event: HubStatusEvent) {
        if let Err(e) = self.publisher.publish_hub_status(&event).await {
            warn!(error = %e, "failed to publish hub status event");
        }
    }
}
