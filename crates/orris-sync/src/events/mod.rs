//! Cross-instance bus events and the in-process domain event dispatcher.

pub mod dispatcher;
pub mod handlers;

pub use dispatcher::*;
pub use handlers::*;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Pub/sub channel carrying subscription lifecycle events between
/// control-plane instances.
pub const SUBSCRIPTION_CHANGE_CHANNEL: &str = "orris:subscription:change";

/// Pub/sub channel carrying agent/node presence transitions.
pub const HUB_STATUS_CHANNEL: &str = "orris:hub:status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionChangeKind {
    Activation,
    Deactivation,
    Update,
}

/// A subscription lifecycle event as published on the bus. Carries intent
/// only; receiving instances recompute state from the repository, which
/// makes redelivery idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionChangeEvent {
    pub subscription_id: u64,
    pub subscription_sid: String,
    pub change_type: SubscriptionChangeKind,
    pub timestamp: i64,
}

impl SubscriptionChangeEvent {
    pub fn new(subscription_id: u64, subscription_sid: String, change_type: SubscriptionChangeKind) -> Self {
        Self {
            subscription_id,
            subscription_sid,
            change_type,
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Agent/node presence transition as published on the hub status channel.
/// Peer instances use these to track cluster-wide presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubStatusEvent {
    AgentOnline {
        agent_id: String,
        agent_sid: String,
        agent_name: String,
        timestamp: i64,
        instance_id: String,
    },
    AgentOffline {
        agent_id: String,
        agent_sid: String,
        agent_name: String,
        timestamp: i64,
        instance_id: String,
    },
    NodeOnline {
        node_id: u64,
        node_sid: String,
        node_name: String,
        timestamp: i64,
        instance_id: String,
    },
    NodeOffline {
        node_id: u64,
        node_sid: String,
        node_name: String,
        timestamp: i64,
        instance_id: String,
    },
}

/// Handler invoked for each subscription change received from the bus.
///
/// Implementations must be idempotent and must never publish back to the
/// bus, or every instance would replay its peers' events forever.
#[async_trait]
pub trait SubscriptionChangeHandler: Send + Sync {
    async fn handle(&self, event: SubscriptionChangeEvent);
}

/// Handler invoked for each hub status event received from the bus.
#[async_trait]
pub trait HubStatusHandler: Send + Sync {
    async fn handle(&self, event: HubStatusEvent);
}
