//! Standard event handlers wiring the bus and dispatcher into the sync
//! engines.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config_sync::ConfigSyncEngine;
use crate::events::{
    DomainEvent, DomainEventHandler, SubscriptionChangeEvent, SubscriptionChangeHandler,
    SubscriptionChangeKind,
};
use crate::message::ChangeType;
use crate::ports::SubscriptionRepository;
use crate::subscription_sync::SubscriptionSyncEngine;

/// Runs the reconnect recovery path: when a node comes online it receives a
/// full config sync followed by a full subscription sync.
pub struct ConnectSyncHandler {
    config_sync: Arc<ConfigSyncEngine>,
    subscription_sync: Arc<SubscriptionSyncEngine>,
}

impl ConnectSyncHandler {
    pub fn new(
        config_sync: Arc<ConfigSyncEngine>,
        subscription_sync: Arc<SubscriptionSyncEngine>,
    ) -> Self {
        Self {
            config_sync,
            subscription_sync,
        }
    }
}

#[async_trait]
impl DomainEventHandler for ConnectSyncHandler {
    async fn handle(&self, event: DomainEvent) {
        match event {
            DomainEvent::NodeConnected { node_id } => {
                if let Err(e) = self.config_sync.full_sync_to_node(node_id).await {
                    warn!(node_id, error = %e, "config full sync on connect failed");
                }
                if let Err(e) = self.subscription_sync.sync_on_connect(node_id).await {
                    warn!(node_id, error = %e, "subscription sync on connect failed");
                }
            }
            DomainEvent::NodeDisconnected { node_id } => {
                debug!(node_id, "node disconnected");
            }
        }
    }
}

/// Applies subscription change events received from peer instances by
/// re-notifying locally connected nodes. Never publishes back to the bus.
pub struct RemoteChangeHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    engine: Arc<SubscriptionSyncEngine>,
}

impl RemoteChangeHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        engine: Arc<SubscriptionSyncEngine>,
    ) -> Self {
        Self {
            subscriptions,
            engine,
        }
    }
}

#[async_trait]
impl SubscriptionChangeHandler for RemoteChangeHandler {
    async fn handle(&self, event: SubscriptionChangeEvent) {
        let subscription = match self.subscriptions.get(event.subscription_id).await {
            Ok(Some(sub)) => sub,
            Ok(None) => {
                warn!(
                    subscription_id = event.subscription_id,
                    "subscription from bus event not found"
                );
                return;
            }
            Err(e) => {
                warn!(
                    subscription_id = event.subscription_id,
                    error = %e,
                    "failed to load subscription for bus event"
                );
                return;
            }
        };

        let change = match event.change_type {
            SubscriptionChangeKind::Activation => ChangeType::Added,
            SubscriptionChangeKind::Deactivation => ChangeType::Removed,
            SubscriptionChangeKind::Update => ChangeType::Updated,
        };

        if let Err(e) = self
            .engine
            .notify_subscription_change(&subscription, change)
            .await
        {
            warn!(
                subscription_id = event.subscription_id,
                change = ?event.change_type,
                error = %e,
                "failed to apply remote subscription change"
            );
        }
    }
}
