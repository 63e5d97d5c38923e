//! Per-subscription suspended flags.
//!
//! One boolean key per subscription, read by the data-plane layers that
//! need a fast "is this credential suspended" answer without a repository
//! roundtrip.

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use orris_sync::{QuotaCache, SyncError};

fn suspended_key(subscription_id: u64) -> String {
    format!("orris:quota:suspended:{subscription_id}")
}

pub struct RedisQuotaCache {
    conn: ConnectionManager,
}

impl RedisQuotaCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl QuotaCache for RedisQuotaCache {
    async fn set_suspended(
        &self,
        subscription_id: u64,
        suspended: bool,
    ) -> Result<(), SyncError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(suspended_key(subscription_id))
            .arg(if suspended { "1" } else { "0" })
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| SyncError::TransientIo(e.to_string()))
    }
}
