//! Traffic quota enforcement.
//!
//! Usage is split across two sources: the hourly cache covers the trailing
//! 24 hours at sub-hour resolution, while older usage comes as one
//! aggregated read from durable daily stats. Either source may fail without
//! aborting enforcement as long as the other yields a usable reading.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use orris_domain::{PlanType, SubscriptionStatus};

use crate::error::SyncError;
use crate::ports::{
    DeactivationNotifier, PlanRepository, QuotaCache, SubscriptionRepository, TrafficCache,
    UsageStatsRepository,
};

pub struct QuotaEnforcer {
    subscriptions: Arc<dyn SubscriptionRepository>,
    plans: Arc<dyn PlanRepository>,
    usage: Arc<dyn UsageStatsRepository>,
    traffic_cache: Arc<dyn TrafficCache>,
    quota_cache: Arc<dyn QuotaCache>,
    notifier: Arc<dyn DeactivationNotifier>,
}

impl QuotaEnforcer {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        plans: Arc<dyn PlanRepository>,
        usage: Arc<dyn UsageStatsRepository>,
        traffic_cache: Arc<dyn TrafficCache>,
        quota_cache: Arc<dyn QuotaCache>,
        notifier: Arc<dyn DeactivationNotifier>,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            usage,
            traffic_cache,
            quota_cache,
            notifier,
        }
    }

    /// Compare the subscription's total usage to its plan limit and suspend
    /// it when exceeded. Suspension persists first; the cache flag and the
    /// node-side deactivation are best-effort afterwards.
    pub async fn check_and_enforce(&self, subscription_id: u64) -> Result<(), SyncError> {
        let Some(mut subscription) = self.subscriptions.get(subscription_id).await? else {
            return Ok(());
        };
        if subscription.status == SubscriptionStatus::Suspended {
            return Ok(());
        }

        let Some(plan) = self.plans.get(subscription.plan_id).await? else {
            return Ok(());
        };
        if plan.plan_type != PlanType::Node {
            return Ok(());
        }
        if plan.features.traffic_is_unlimited() {
            return Ok(());
        }

        let used = self.total_traffic(subscription_id).await?;
        let limit = plan.features.traffic_limit_bytes;
        if used <= limit {
            debug!(subscription_id, used, limit, "subscription within quota");
            return Ok(());
        }

        let reason = format!("traffic quota exceeded: used {used} bytes of {limit} bytes");
        info!(subscription_id, used, limit, "suspending subscription over quota");
        self.subscriptions
            .update_status(subscription_id, SubscriptionStatus::Suspended, &reason)
            .await
            .map_err(|e| match e {
                // Loaded moments ago, so a miss here is repository corruption.
                SyncError::NotFound(_) => SyncError::Fatal(format!(
                    "subscription {subscription_id} vanished during suspension"
                )),
                other => other,
            })?;
        subscription.status = SubscriptionStatus::Suspended;

        if let Err(e) = self.quota_cache.set_suspended(subscription_id, true).await {
            warn!(subscription_id, error = %e, "failed to record suspended flag in quota cache");
        }
        if let Err(e) = self.notifier.notify_deactivation(&subscription).await {
            warn!(subscription_id, error = %e, "failed to propagate suspension to nodes");
        }
        Ok(())
    }

    /// Recent (trailing 24 h, hourly cache) plus historical (durable stats
    /// before the window) usage. A failed recent read falls back to
    /// historical alone; a failed historical read with no recent usage is
    /// unanswerable and surfaces `TrafficSource`.
    async fn total_traffic(&self, subscription_id: u64) -> Result<u64, SyncError> {
        let recent = match self.traffic_cache.recent_traffic(subscription_id).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(
                    subscription_id,
                    error = %e,
                    "recent traffic read failed, continuing with historical only"
                );
                None
            }
        };

        let cutoff = Utc::now() - Duration::hours(24);
        let historical = match self.usage.total_traffic_before(subscription_id, cutoff).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(
                    subscription_id,
                    error = %e,
                    "historical traffic read failed"
                );
                None
            }
        };

        if historical.is_none() && recent.unwrap_or(0) == 0 {
            return Err(SyncError::TrafficSource(subscription_id));
        }
        Ok(recent.unwrap_or(0) + historical.unwrap_or(0))
    }
}
