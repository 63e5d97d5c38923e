//! Hourly traffic buckets in Redis.
//!
//! Layout: one hash per (subscription, hour) under
//! `orris:traffic:node:<subscription_id>:<unix_hour>` with `up`/`down`
//! fields. Buckets expire after 48 hours; anything older lives in the
//! durable usage stats, which the quota enforcer reads separately.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;

use orris_sync::{SyncError, TrafficCache, TrafficDelta};

const HOUR_SECS: i64 = 3600;
const BUCKET_RETENTION_SECS: i64 = 48 * 3600;
/// Hours summed by a recent-traffic read, the current hour included.
const RECENT_WINDOW_HOURS: i64 = 24;

fn bucket_key(subscription_id: u64, hour: i64) -> String {
    format!("orris:traffic:node:{subscription_id}:{hour}")
}

pub struct RedisTrafficCache {
    conn: ConnectionManager,
}

impl RedisTrafficCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TrafficCache for RedisTrafficCache {
    async fn batch_increment(&self, entries: &[TrafficDelta]) -> Result<(), SyncError> {
        if entries.is_empty() {
            return Ok(());
        }
        let hour = Utc::now().timestamp() / HOUR_SECS;

        let mut pipe = redis::pipe();
        for entry in entries {
            let key = bucket_key(entry.subscription_id, hour);
            if entry.upload > 0 {
                pipe.cmd("HINCRBY")
                    .arg(&key)
                    .arg("up")
                    .arg(entry.upload)
                    .ignore();
            }
            if entry.download > 0 {
                pipe.cmd("HINCRBY")
                    .arg(&key)
                    .arg("down")
                    .arg(entry.download)
                    .ignore();
            }
            pipe.cmd("EXPIRE")
                .arg(&key)
                .arg(BUCKET_RETENTION_SECS)
                .ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| SyncError::TransientIo(e.to_string()))
    }

    async fn recent_traffic(&self, subscription_id: u64) -> Result<u64, SyncError> {
        let now_hour = Utc::now().timestamp() / HOUR_SECS;

        let mut pipe = redis::pipe();
        for hour in (now_hour - RECENT_WINDOW_HOURS + 1)..=now_hour {
            pipe.cmd("HMGET")
                .arg(bucket_key(subscription_id, hour))
                .arg("up")
                .arg("down");
        }

        let mut conn = self.conn.clone();
        let buckets: Vec<(Option<u64>, Option<u64>)> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| SyncError::TransientIo(e.to_string()))?;

        Ok(buckets
            .into_iter()
            .map(|(up, down)| up.unwrap_or(0) + down.unwrap_or(0))
            .sum())
    }
}
