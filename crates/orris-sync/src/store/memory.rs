//! In-memory repository store.
//!
//! Backs the repository ports with plain maps. Persistent storage lives
//! behind the same traits in the deployment's storage layer; this store
//! serves the wiring binary and the test suites, which populate it through
//! the `add_*` helpers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use orris_domain::{Node, Plan, ResourceGroup, Subscription, SubscriptionStatus};

use crate::error::SyncError;
use crate::ports::{
    NodeRepository, PlanRepository, ResourceGroupRepository, SubscriptionRepository,
    UsageStatsRepository,
};

#[derive(Default)]
pub struct MemoryStore {
    nodes: RwLock<HashMap<u64, Node>>,
    subscriptions: RwLock<HashMap<u64, Subscription>>,
    plans: RwLock<HashMap<u64, Plan>>,
    groups: RwLock<Vec<ResourceGroup>>,
    /// Aggregated historical traffic per subscription, in bytes.
    historical_traffic: RwLock<HashMap<u64, u64>>,
    status_reasons: RwLock<HashMap<u64, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: Node) {
        self.nodes.write().insert(node.id, node);
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .insert(subscription.id, subscription);
    }

    /// Insert or replace a plan; replacing is how feature edits land.
    pub fn add_plan(&self, plan: Plan) {
        self.plans.write().insert(plan.id, plan);
    }

    pub fn add_group(&self, group: ResourceGroup) {
        self.groups.write().push(group);
    }

    pub fn set_historical_traffic(&self, subscription_id: u64, bytes: u64) {
        self.historical_traffic
            .write()
            .insert(subscription_id, bytes);
    }

    pub fn subscription_status(&self, subscription_id: u64) -> Option<SubscriptionStatus> {
        self.subscriptions
            .read()
            .get(&subscription_id)
            .map(|s| s.status)
    }

    pub fn status_reason(&self, subscription_id: u64) -> Option<String> {
        self.status_reasons
            .read()
            .get(&subscription_id)
            .cloned()
    }
}

#[async_trait]
impl NodeRepository for MemoryStore {
    async fn get(&self, node_id: u64) -> Result<Option<Node>, SyncError> {
        Ok(self.nodes.read().get(&node_id).cloned())
    }

    async fn get_by_sid(&self, sid: &str) -> Result<Option<Node>, SyncError> {
        Ok(self
            .nodes
            .read()
            .values()
            .find(|n| n.sid == sid)
            .cloned())
    }

    async fn get_by_sids(&self, sids: &[String]) -> Result<Vec<Node>, SyncError> {
        let nodes = self.nodes.read();
        Ok(sids
            .iter()
            .filter_map(|sid| nodes.values().find(|n| &n.sid == sid).cloned())
            .collect())
    }

    async fn list_by_groups(&self, group_ids: &[u64]) -> Result<Vec<Node>, SyncError> {
        let groups = self.groups.read();
        let mut node_ids: Vec<u64> = groups
            .iter()
            .filter(|g| group_ids.contains(&g.id))
            .flat_map(|g| g.node_ids.iter().copied())
            .collect();
        node_ids.sort_unstable();
        node_ids.dedup();

        let nodes = self.nodes.read();
        Ok(node_ids
            .iter()
            .filter_map(|id| nodes.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn get(&self, subscription_id: u64) -> Result<Option<Subscription>, SyncError> {
        Ok(self
            .subscriptions
            .read()
            .get(&subscription_id)
            .cloned())
    }

    async fn update_status(
        &self,
        subscription_id: u64,
        status: SubscriptionStatus,
        reason: &str,
    ) -> Result<(), SyncError> {
        let mut subscriptions = self.subscriptions.write();
        let subscription = subscriptions
            .get_mut(&subscription_id)
            .ok_or(SyncError::NotFound("subscription"))?;
        subscription.status = status;
        self.status_reasons
            .write()
            .insert(subscription_id, reason.to_string());
        Ok(())
    }

    async fn list_active_for_node(&self, node_id: u64) -> Result<Vec<Subscription>, SyncError> {
        let plan_ids: Vec<u64> = self
            .groups
            .read()
            .iter()
            .filter(|g| g.is_active && g.node_ids.contains(&node_id))
            .flat_map(|g| g.plan_ids.iter().copied())
            .collect();

        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.is_active() && plan_ids.contains(&s.plan_id))
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.id);
        Ok(subscriptions)
    }

    async fn list_active(&self) -> Result<Vec<Subscription>, SyncError> {
        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.id);
        Ok(subscriptions)
    }
}

#[async_trait]
impl PlanRepository for MemoryStore {
    async fn get(&self, plan_id: u64) -> Result<Option<Plan>, SyncError> {
        Ok(self.plans.read().get(&plan_id).cloned())
    }

    async fn get_many(&self, plan_ids: &[u64]) -> Result<Vec<Plan>, SyncError> {
        let plans = self.plans.read();
        Ok(plan_ids
            .iter()
            .filter_map(|id| plans.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl ResourceGroupRepository for MemoryStore {
    async fn groups_for_plan(&self, plan_id: u64) -> Result<Vec<ResourceGroup>, SyncError> {
        Ok(self
            .groups
            .read()
            .iter()
            .filter(|g| g.plan_ids.contains(&plan_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UsageStatsRepository for MemoryStore {
    async fn total_traffic_before(
        &self,
        subscription_id: u64,
        _cutoff: DateTime<Utc>,
    ) -> Result<u64, SyncError> {
        Ok(self
            .historical_traffic
            .read()
            .get(&subscription_id)
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use orris_domain::{PlanFeatures, PlanType, Protocol, ResourceType};

    fn node(id: u64) -> Node {
        Node {
            id,
            sid: format!("n_{id}"),
            name: format!("node-{id}"),
            address: format!("198.51.100.{id}"),
            port: 443,
            protocol: Protocol::Trojan,
            encryption_method: None,
            token_hash: format!("t{id}"),
            route_config: None,
            dns_config: None,
        }
    }

    fn subscription(id: u64, plan_id: u64, status: SubscriptionStatus) -> Subscription {
        Subscription {
            id,
            sid: format!("s_{id}"),
            name: format!("user-{id}"),
            plan_id,
            uuid: Uuid::from_u128(id as u128),
            expire_at: Utc.timestamp_opt(2_000_000_000, 0).unwrap(),
            status,
            resource_type: ResourceType::Node,
        }
    }

    fn group(id: u64, active: bool, plan_ids: Vec<u64>, node_ids: Vec<u64>) -> ResourceGroup {
        ResourceGroup {
            id,
            name: format!("group-{id}"),
            is_active: active,
            plan_ids,
            node_ids,
        }
    }

    #[tokio::test]
    async fn test_list_by_groups_dedups_nodes() {
        let store = MemoryStore::new();
        store.add_node(node(1));
        store.add_node(node(2));
        store.add_group(group(10, true, vec![1], vec![1, 2]));
        store.add_group(group(11, true, vec![1], vec![2]));

        let nodes = store.list_by_groups(&[10, 11]).await.unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_active_subscriptions_for_node_skips_inactive_groups() {
        let store = MemoryStore::new();
        store.add_node(node(1));
        store.add_plan(Plan {
            id: 1,
            name: "p".to_string(),
            plan_type: PlanType::Node,
            features: PlanFeatures::default(),
        });
        store.add_group(group(10, true, vec![1], vec![1]));
        store.add_group(group(11, false, vec![2], vec![1]));
        store.add_subscription(subscription(100, 1, SubscriptionStatus::Active));
        store.add_subscription(subscription(101, 2, SubscriptionStatus::Active));
        store.add_subscription(subscription(102, 1, SubscriptionStatus::Suspended));

        let subs = store.list_active_for_node(1).await.unwrap();
        assert_eq!(subs.iter().map(|s| s.id).collect::<Vec<_>>(), vec![100]);
    }

    #[tokio::test]
    async fn test_update_status_records_reason() {
        let store = MemoryStore::new();
        store.add_subscription(subscription(100, 1, SubscriptionStatus::Active));

        store
            .update_status(100, SubscriptionStatus::Suspended, "over quota")
            .await
            .unwrap();

        assert_eq!(
            store.subscription_status(100),
            Some(SubscriptionStatus::Suspended)
        );
        assert_eq!(store.status_reason(100).unwrap(), "over quota");
    }

    #[tokio::test]
    async fn test_update_status_unknown_subscription_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store
                .update_status(9, SubscriptionStatus::Suspended, "x")
                .await,
            Err(SyncError::NotFound(_))
        ));
    }
}
