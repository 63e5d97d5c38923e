//! Subscription authorization sync.
//!
//! Lifecycle transitions publish a cross-instance event first, then notify
//! locally connected nodes; handlers fed from the bus call only the local
//! notify path, so events are never re-published. The recipient set of a
//! subscription is resolved through its plan's active resource groups.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use orris_domain::{
    derive_user_password, forwarding_password, Node, PlanFeatures, Subscription,
};

use crate::error::SyncError;
use crate::events::{SubscriptionChangeEvent, SubscriptionChangeKind};
use crate::hub::Hub;
use crate::message::{
    ChangeType, SubscriptionRecord, SubscriptionSyncData, SyncEnvelope, NODE_FORWARDING_SID,
};
use crate::metrics::SYNC_SEND_FAILURES_TOTAL;
use crate::ports::{
    DeactivationNotifier, EventPublisher, NodeRepository, PlanRepository,
    ResourceGroupRepository, SubscriptionRepository,
};

pub struct SubscriptionSyncEngine {
    hub: Arc<Hub>,
    nodes: Arc<dyn NodeRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    plans: Arc<dyn PlanRepository>,
    groups: Arc<dyn ResourceGroupRepository>,
    publisher: Arc<dyn EventPublisher>,
    /// HMAC secret feeding user password derivation.
    secret: String,
}

impl SubscriptionSyncEngine {
    pub fn new(
        hub: Arc<Hub>,
        nodes: Arc<dyn NodeRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        plans: Arc<dyn PlanRepository>,
        groups: Arc<dyn ResourceGroupRepository>,
        publisher: Arc<dyn EventPublisher>,
        secret: String,
    ) -> Self {
        Self {
            hub,
            nodes,
            subscriptions,
            plans,
            groups,
            publisher,
            secret,
        }
    }

    pub async fn notify_subscription_activation(
        &self,
        subscription: &Subscription,
    ) -> Result<(), SyncError> {
        self.publish_change(subscription, SubscriptionChangeKind::Activation)
            .await;
        self.notify_subscription_change(subscription, ChangeType::Added)
            .await
    }

    pub async fn notify_subscription_deactivation(
        &self,
        subscription: &Subscription,
    ) -> Result<(), SyncError> {
        self.publish_change(subscription, SubscriptionChangeKind::Deactivation)
            .await;
        self.notify_subscription_change(subscription, ChangeType::Removed)
            .await
    }

    pub async fn notify_subscription_update(
        &self,
        subscription: &Subscription,
    ) -> Result<(), SyncError> {
        self.publish_change(subscription, SubscriptionChangeKind::Update)
            .await;
        self.notify_subscription_change(subscription, ChangeType::Updated)
            .await
    }

    /// Publish before notifying locally, so peers observing the event see a
    /// state already visible in shared storage. Failures are logged and
    /// swallowed; local fan-out still happens.
    async fn publish_change(&self, subscription: &Subscription, kind: SubscriptionChangeKind) {
        let event =
            SubscriptionChangeEvent::new(subscription.id, subscription.sid.clone(), kind);
        if let Err(e) = self.publisher.publish_subscription_change(&event).await {
            warn!(
                subscription_id = subscription.id,
                change = ?kind,
                error = %e,
                "event publish failed, continuing with local fan-out"
            );
        }
    }

    /// Send a single-subscription delta to every online node that serves
    /// the subscription's plan. Send failures are logged per node and never
    /// abort the fan-out.
    pub async fn notify_subscription_change(
        &self,
        subscription: &Subscription,
        change: ChangeType,
    ) -> Result<(), SyncError> {
        let recipients = self.recipient_nodes(subscription.plan_id).await?;
        if recipients.is_empty() {
            debug!(
                subscription_id = subscription.id,
                "no recipient nodes for subscription change"
            );
            return Ok(());
        }

        let features = match self.plans.get(subscription.plan_id).await {
            Ok(Some(plan)) => plan.features,
            Ok(None) => {
                warn!(
                    subscription_id = subscription.id,
                    plan_id = subscription.plan_id,
                    "plan missing while building subscription record"
                );
                PlanFeatures::default()
            }
            Err(e) => {
                warn!(
                    subscription_id = subscription.id,
                    plan_id = subscription.plan_id,
                    error = %e,
                    "plan fetch failed while building subscription record"
                );
                PlanFeatures::default()
            }
        };

        for node in &recipients {
            if !self.hub.is_node_online(node.id) {
                continue;
            }
            let data = SubscriptionSyncData {
                change_type: change,
                subscriptions: vec![self.record_for(subscription, node, &features)],
                timestamp: Utc::now().timestamp(),
            };
            let envelope = SyncEnvelope::subscription_sync(node.sid.clone(), data);
            let bytes = serde_json::to_vec(&envelope)?;
            if let Err(e) = self.hub.send_message(node.id, bytes) {
                SYNC_SEND_FAILURES_TOTAL
                    .with_label_values(&["subscription_sync"])
                    .inc();
                warn!(
                    node_id = node.id,
                    subscription_id = subscription.id,
                    change = ?change,
                    error = %e,
                    "subscription sync send failed"
                );
            }
        }
        Ok(())
    }

    /// Send the node its complete authorization set in one `added` message:
    /// every given subscription plus, for forwarding-capable protocols, the
    /// trailing node-forwarding record.
    pub async fn full_sync_subscriptions_to_node(
        &self,
        node_id: u64,
        subscriptions: &[Subscription],
    ) -> Result<(), SyncError> {
        if !self.hub.is_node_online(node_id) {
            return Ok(());
        }
        let node = self
            .nodes
            .get(node_id)
            .await?
            .ok_or(SyncError::NotFound("node"))?;

        // One batched plan fetch covers every record; device/speed limits
        // come from this map so plan feature edits reach already-active
        // subscriptions.
        let mut plan_ids: Vec<u64> = subscriptions.iter().map(|s| s.plan_id).collect();
        plan_ids.sort_unstable();
        plan_ids.dedup();
        let features_by_plan: std::collections::HashMap<u64, PlanFeatures> = self
            .plans
            .get_many(&plan_ids)
            .await?
            .into_iter()
            .map(|plan| (plan.id, plan.features))
            .collect();

        let mut records: Vec<SubscriptionRecord> = subscriptions
            .iter()
            .map(|sub| {
                let features = features_by_plan
                    .get(&sub.plan_id)
                    .copied()
                    .unwrap_or_default();
                self.record_for(sub, &node, &features)
            })
            .collect();

        if node.protocol.supports_forwarding() {
            records.push(Self::node_forward_record(&node));
        }

        if records.is_empty() {
            return Ok(());
        }

        let data = SubscriptionSyncData {
            change_type: ChangeType::Added,
            subscriptions: records,
            timestamp: Utc::now().timestamp(),
        };
        let envelope = SyncEnvelope::subscription_sync(node.sid.clone(), data);
        let bytes = serde_json::to_vec(&envelope)?;

        match self.hub.send_message(node_id, bytes) {
            Ok(()) => {
                debug!(
                    node_id,
                    subscriptions = subscriptions.len(),
                    "full subscription sync sent"
                );
                Ok(())
            }
            Err(SyncError::NodeOffline(_)) => Ok(()),
            Err(e) => {
                SYNC_SEND_FAILURES_TOTAL
                    .with_label_values(&["subscription_sync"])
                    .inc();
                Err(e)
            }
        }
    }

    /// Full authorization sync for a node that just connected.
    pub async fn sync_on_connect(&self, node_id: u64) -> Result<(), SyncError> {
        let subscriptions = self.subscriptions.list_active_for_node(node_id).await?;
        self.full_sync_subscriptions_to_node(node_id, &subscriptions)
            .await
    }

    /// Re-sync every online node serving the plan after its features (e.g.
    /// device limit) changed; active subscriptions pick up the new limits
    /// without per-subscription mutations.
    pub async fn notify_plan_features_changed(&self, plan_id: u64) -> Result<(), SyncError> {
        let recipients = self.recipient_nodes(plan_id).await?;
        for node in recipients {
            if !self.hub.is_node_online(node.id) {
                continue;
            }
            if let Err(e) = self.sync_on_connect(node.id).await {
                warn!(
                    node_id = node.id,
                    plan_id,
                    error = %e,
                    "plan features re-sync failed"
                );
            }
        }
        Ok(())
    }

    /// The authoritative recipient set: nodes of the plan's active resource
    /// groups.
    async fn recipient_nodes(&self, plan_id: u64) -> Result<Vec<Node>, SyncError> {
        let groups = self.groups.groups_for_plan(plan_id).await?;
        let active_ids: Vec<u64> = groups
            .iter()
            .filter(|g| g.is_active)
            .map(|g| g.id)
            .collect();
        if active_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.nodes.list_by_groups(&active_ids).await
    }

    fn record_for(
        &self,
        subscription: &Subscription,
        node: &Node,
        features: &PlanFeatures,
    ) -> SubscriptionRecord {
        let method = node.encryption_method.as_deref().unwrap_or("");
        SubscriptionRecord {
            subscription_sid: subscription.sid.clone(),
            password: derive_user_password(&subscription.uuid, &self.secret, method),
            name: subscription.name.clone(),
            speed_limit: features.speed_limit,
            device_limit: features.device_limit,
            expire_time: subscription.expire_at.timestamp(),
        }
    }

    fn node_forward_record(node: &Node) -> SubscriptionRecord {
        SubscriptionRecord {
            subscription_sid: NODE_FORWARDING_SID.to_string(),
            password: forwarding_password(node),
            name: format!("node-forward-{}", node.sid),
            speed_limit: 0,
            device_limit: 0,
            expire_time: 0,
        }
    }
}

#[async_trait]
impl DeactivationNotifier for SubscriptionSyncEngine {
    async fn notify_deactivation(&self, subscription: &Subscription) -> Result<(), SyncError> {
        self.notify_subscription_deactivation(subscription).await
    }
}
