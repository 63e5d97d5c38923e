//! Wire messages pushed to node agents.
//!
//! Field names are part of the agent protocol; the serialization tests pin
//! them exactly.

use chrono::Utc;
use orris_domain::{DnsConfig, Node, Protocol, RouteConfig};
use serde::{Deserialize, Serialize};

/// Reserved subscription SID of the synthetic peer-relay authorization.
pub const NODE_FORWARDING_SID: &str = "node-forwarding";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ConfigSync,
    SubscriptionSync,
}

/// Kind of a subscription-sync delta as seen by the node agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Removed,
    Updated,
}

/// Outer envelope of every message sent over the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEnvelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// SID of the addressed node.
    pub node_id: String,
    pub timestamp: i64,
    pub data: SyncPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncPayload {
    Config(ConfigSyncData),
    Subscription(SubscriptionSyncData),
}

impl SyncEnvelope {
    pub fn config_sync(node_sid: String, data: ConfigSyncData) -> Self {
        Self {
            kind: MessageKind::ConfigSync,
            node_id: node_sid,
            timestamp: Utc::now().timestamp(),
            data: SyncPayload::Config(data),
        }
    }

    pub fn subscription_sync(node_sid: String, data: SubscriptionSyncData) -> Self {
        Self {
            kind: MessageKind::SubscriptionSync,
            node_id: node_sid,
            timestamp: Utc::now().timestamp(),
            data: SyncPayload::Subscription(data),
        }
    }
}

/// A peer node the addressed node may forward traffic to, with its derived
/// server-forwarding key resolved eagerly so no further roundtrips are
/// needed on the agent side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub node_sid: String,
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
    pub password: String,
}

impl PeerEndpoint {
    pub fn from_node(node: &Node) -> Self {
        Self {
            node_sid: node.sid.clone(),
            address: node.address.clone(),
            port: node.port,
            protocol: node.protocol,
            password: orris_domain::forwarding_password(node),
        }
    }
}

/// Full authoritative config for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigPayload {
    pub route: Option<RouteConfig>,
    pub dns: Option<DnsConfig>,
    pub peers: Vec<PeerEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSyncData {
    pub version: u64,
    /// True when the agent should reset local derived state before applying.
    /// Both paths carry the whole config; only this flag differs.
    pub full_sync: bool,
    pub config: NodeConfigPayload,
    pub timestamp: i64,
}

/// One authorization record as installed on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub subscription_sid: String,
    pub password: String,
    pub name: String,
    pub speed_limit: i64,
    pub device_limit: i64,
    pub expire_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSyncData {
    pub change_type: ChangeType,
    pub subscriptions: Vec<SubscriptionRecord>,
    pub timestamp: i64,
}
