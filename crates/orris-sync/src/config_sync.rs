//! Per-node configuration sync.
//!
//! Full and incremental sync share one code path: the authoritative node
//! config is small, so both carry the whole config and only the `full_sync`
//! flag differs. Peer references are resolved eagerly so agents can forward
//! to peers without further roundtrips.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use orris_domain::Node;

use crate::error::SyncError;
use crate::hub::Hub;
use crate::message::{ConfigSyncData, NodeConfigPayload, PeerEndpoint, SyncEnvelope};
use crate::metrics::SYNC_SEND_FAILURES_TOTAL;
use crate::ports::NodeRepository;
use crate::version::VersionOracle;

pub struct ConfigSyncEngine {
    hub: Arc<Hub>,
    nodes: Arc<dyn NodeRepository>,
    oracle: Arc<VersionOracle>,
}

impl ConfigSyncEngine {
    pub fn new(hub: Arc<Hub>, nodes: Arc<dyn NodeRepository>, oracle: Arc<VersionOracle>) -> Self {
        Self { hub, nodes, oracle }
    }

    /// Push the node's full config. Invoked when a node comes online or on
    /// admin request. A no-op for offline nodes.
    pub async fn full_sync_to_node(&self, node_id: u64) -> Result<(), SyncError> {
        self.sync_node(node_id, true).await
    }

    /// Push the node's config after a mutation. Same payload as a full
    /// sync; the cleared flag tells the agent it may keep derived state.
    pub async fn notify_config_change(&self, node_id: u64) -> Result<(), SyncError> {
        self.sync_node(node_id, false).await
    }

    async fn sync_node(&self, node_id: u64, full_sync: bool) -> Result<(), SyncError> {
        if !self.hub.is_node_online(node_id) {
            debug!(node_id, "skipping config sync for offline node");
            return Ok(());
        }

        let node = self
            .nodes
            .get(node_id)
            .await?
            .ok_or(SyncError::NotFound("node"))?;

        let peers = self.resolve_peers(&node).await;

        // The version advances even if the send below fails; the next sync
        // simply carries a higher one.
        let version = self.oracle.increment();
        let data = ConfigSyncData {
            version,
            full_sync,
            config: NodeConfigPayload {
                route: node.route_config.clone(),
                dns: node.dns_config.clone(),
                peers,
            },
            timestamp: Utc::now().timestamp(),
        };
        let envelope = SyncEnvelope::config_sync(node.sid.clone(), data);
        let bytes = serde_json::to_vec(&envelope)?;

        match self.hub.send_message(node_id, bytes) {
            Ok(()) => {
                debug!(node_id, version, full_sync, "config sync sent");
                Ok(())
            }
            // Raced an offline transition; the reconnect full sync recovers.
            Err(SyncError::NodeOffline(_)) => Ok(()),
            Err(e) => {
                SYNC_SEND_FAILURES_TOTAL
                    .with_label_values(&["config_sync"])
                    .inc();
                Err(e)
            }
        }
    }

    /// Fetch the peers referenced by the node's route and DNS configs. A
    /// fetch error degrades to an empty peer list so the sync still
    /// proceeds.
    async fn resolve_peers(&self, node: &Node) -> Vec<PeerEndpoint> {
        let peer_sids = node.referenced_peer_sids();
        if peer_sids.is_empty() {
            return Vec::new();
        }

        let peers = match self.nodes.get_by_sids(&peer_sids).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(
                    node_id = node.id,
                    error = %e,
                    "peer fetch failed, syncing config without peers"
                );
                return Vec::new();
            }
        };

        peers.iter().map(PeerEndpoint::from_node).collect()
    }
}
