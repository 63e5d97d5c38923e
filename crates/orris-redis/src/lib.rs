//! Redis-backed adapters for the sync core: traffic cache, quota cache, and
//! the cross-instance event bus.

pub mod event_bus;
pub mod quota_cache;
pub mod traffic_cache;

pub use event_bus::*;
pub use quota_cache::*;
pub use traffic_cache::*;

use anyhow::{ensure, Context, Result};
use redis::aio::ConnectionManager;

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    /// Create a Redis configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("REDIS_URL").context("REDIS_URL must be set")?;
        Ok(Self { url })
    }
}

/// Open a client plus a shared auto-reconnecting connection.
///
/// The client is kept for pub/sub subscribers, which need dedicated
/// connections; everything else multiplexes over the manager.
pub async fn connect(config: &RedisConfig) -> Result<(redis::Client, ConnectionManager)> {
    tracing::info!("Connecting to redis");
    let client = redis::Client::open(config.url.as_str()).context("invalid REDIS_URL")?;
    let manager = client
        .get_connection_manager()
        .await
        .context("failed to connect to redis")?;
    Ok((client, manager))
}

/// Verify the connection is usable. Run at startup before anything depends
/// on the cache.
pub async fn health_check(conn: &ConnectionManager) -> Result<()> {
    let mut conn = conn.clone();
    let pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .context("redis health check failed")?;
    ensure!(pong == "PONG", "unexpected PING reply: {pong}");
    Ok(())
}
