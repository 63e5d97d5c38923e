//! Sync core configuration, read from environment variables with typed
//! fallbacks.

use std::time::Duration;

use anyhow::{Context, Result};

/// Traffic aggregator tuning.
#[derive(Debug, Clone)]
pub struct TrafficConfig {
    /// Number of shards; entries are routed by `subscription_id % shards`.
    pub shards: usize,
    /// Interval between background flushes.
    pub flush_interval: Duration,
    /// Failed batches are re-queued until an entry has been retried this
    /// many times, then the entry is dropped.
    pub max_retries: u32,
    /// Maximum entries per cache write.
    pub batch_size: usize,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            flush_interval: Duration::from_secs(5),
            max_retries: 10,
            batch_size: 500,
        }
    }
}

impl TrafficConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let shards = std::env::var("TRAFFIC_SHARDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(defaults.shards);

        let flush_interval = std::env::var("TRAFFIC_FLUSH_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &u64| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.flush_interval);

        let max_retries = std::env::var("TRAFFIC_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &u32| *v > 0)
            .unwrap_or(defaults.max_retries);

        let batch_size = std::env::var("TRAFFIC_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(defaults.batch_size);

        Self {
            shards,
            flush_interval,
            max_retries,
            batch_size,
        }
    }
}

/// Top-level sync core configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub traffic: TrafficConfig,
    /// Buffer of the in-process domain event dispatcher.
    pub event_buffer_size: usize,
    /// HMAC secret for user password derivation.
    pub jwt_secret: String,
    /// Identity of this control-plane instance on the event bus.
    pub instance_id: String,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret =
            std::env::var("AUTH_JWT_SECRET").context("AUTH_JWT_SECRET must be set")?;

        let event_buffer_size = std::env::var("EVENT_BUFFER_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(100);

        let instance_id = std::env::var("INSTANCE_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self {
            traffic: TrafficConfig::from_env(),
            event_buffer_size,
            jwt_secret,
            instance_id,
        })
    }
}
