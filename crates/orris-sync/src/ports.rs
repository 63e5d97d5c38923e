//! Interfaces the sync core consumes. Storage and cache backends are
//! swappable providers behind these traits; the in-memory implementations
//! live in [`crate::store`] and the Redis-backed ones in the `orris-redis`
//! crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orris_domain::{Node, Plan, ResourceGroup, Subscription, SubscriptionStatus};

use crate::error::SyncError;
use crate::events::{HubStatusEvent, SubscriptionChangeEvent};
use crate::traffic::TrafficDelta;

#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn get(&self, node_id: u64) -> Result<Option<Node>, SyncError>;
    async fn get_by_sid(&self, sid: &str) -> Result<Option<Node>, SyncError>;
    /// Batch lookup by SID; unknown SIDs are skipped, not errors.
    async fn get_by_sids(&self, sids: &[String]) -> Result<Vec<Node>, SyncError>;
    /// Nodes belonging to any of the given resource groups, deduplicated.
    async fn list_by_groups(&self, group_ids: &[u64]) -> Result<Vec<Node>, SyncError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get(&self, subscription_id: u64) -> Result<Option<Subscription>, SyncError>;
    async fn update_status(
        &self,
        subscription_id: u64,
        status: SubscriptionStatus,
        reason: &str,
    ) -> Result<(), SyncError>;
    /// Active subscriptions whose plan maps to an active resource group
    /// containing the node. The storage layer owns the join.
    async fn list_active_for_node(&self, node_id: u64) -> Result<Vec<Subscription>, SyncError>;
    async fn list_active(&self) -> Result<Vec<Subscription>, SyncError>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn get(&self, plan_id: u64) -> Result<Option<Plan>, SyncError>;
    /// Batch lookup; unknown IDs are skipped.
    async fn get_many(&self, plan_ids: &[u64]) -> Result<Vec<Plan>, SyncError>;
}

#[async_trait]
pub trait ResourceGroupRepository: Send + Sync {
    async fn groups_for_plan(&self, plan_id: u64) -> Result<Vec<ResourceGroup>, SyncError>;
}

#[async_trait]
pub trait UsageStatsRepository: Send + Sync {
    /// Aggregated traffic (bytes) recorded strictly before `cutoff`, from
    /// daily-granularity durable stats.
    async fn total_traffic_before(
        &self,
        subscription_id: u64,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, SyncError>;
}

/// Hourly traffic counter cache (Redis in production).
#[async_trait]
pub trait TrafficCache: Send + Sync {
    /// Atomically add a batch of per-(node, subscription) deltas to the
    /// current hour's buckets.
    async fn batch_increment(&self, entries: &[TrafficDelta]) -> Result<(), SyncError>;
    /// Sum of the node-resource hourly buckets over the trailing 24 hours.
    async fn recent_traffic(&self, subscription_id: u64) -> Result<u64, SyncError>;
}

/// Per-subscription suspended flags, kept for fast data-plane checks.
#[async_trait]
pub trait QuotaCache: Send + Sync {
    async fn set_suspended(&self, subscription_id: u64, suspended: bool)
        -> Result<(), SyncError>;
}

/// Cross-instance event publication.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_subscription_change(
        &self,
        event: &SubscriptionChangeEvent,
    ) -> Result<(), SyncError>;
    async fn publish_hub_status(&self, event: &HubStatusEvent) -> Result<(), SyncError>;
}

/// Receives quota suspensions to propagate to nodes. Implemented by the
/// subscription sync engine; a trait so the quota enforcer stays testable in
/// isolation.
#[async_trait]
pub trait DeactivationNotifier: Send + Sync {
    async fn notify_deactivation(&self, subscription: &Subscription) -> Result<(), SyncError>;
}
