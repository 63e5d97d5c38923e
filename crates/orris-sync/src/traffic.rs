//! Sharded traffic aggregation.
//!
//! Node agents report counters at high rate; the aggregator buffers them in
//! memory and ships batched increments to the traffic cache. The hot path
//! must never serialize behind a flush, so each flush swaps a shard's map
//! for a fresh one under the shard lock (O(1) hold time) and works on the
//! detached snapshot while new traffic accumulates into the replacement.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::TrafficConfig;
use crate::ports::TrafficCache;

/// Aggregation identity: counters merge per (node, subscription).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrafficKey {
    pub node_id: u64,
    pub subscription_id: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TrafficEntry {
    upload: u64,
    download: u64,
    retry_count: u32,
}

/// One increment as shipped to the traffic cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficDelta {
    pub node_id: u64,
    pub subscription_id: u64,
    pub upload: u64,
    pub download: u64,
}

pub struct TrafficAggregator {
    shards: Vec<Mutex<HashMap<TrafficKey, TrafficEntry>>>,
    cache: Arc<dyn TrafficCache>,
    config: TrafficConfig,
    shutdown: watch::Sender<bool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl TrafficAggregator {
    pub fn new(cache: Arc<dyn TrafficCache>, config: TrafficConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let shards = (0..config.shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            cache,
            config,
            shutdown,
            flusher: Mutex::new(None),
        }
    }

    /// Record reported traffic. Zero deltas are dropped before taking any
    /// lock.
    pub fn add_traffic(&self, node_id: u64, subscription_id: u64, upload: u64, download: u64) {
        if upload == 0 && download == 0 {
            return;
        }
        self.upsert(
            TrafficKey {
                node_id,
                subscription_id,
            },
            TrafficEntry {
                upload,
                download,
                retry_count: 0,
            },
        );
    }

    /// Merge into the entry's shard: bytes add up, the retry count keeps
    /// the larger value so re-queued entries don't lose their history to
    /// fresh traffic.
    fn upsert(&self, key: TrafficKey, delta: TrafficEntry) {
        let shard = &self.shards[(key.subscription_id % self.shards.len() as u64) as usize];
        let mut entries = shard.lock();
        let entry = entries.entry(key).or_default();
        entry.upload += delta.upload;
        entry.download += delta.download;
        entry.retry_count = entry.retry_count.max(delta.retry_count);
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }

    pub fn pending_entries(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Spawn the periodic flusher. Runs until [`TrafficAggregator::stop`],
    /// then drains with one final flush.
    pub fn start(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let aggregator = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(aggregator.config.flush_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        aggregator.flush().await;
                    }
                    _ = shutdown.changed() => {
                        aggregator.flush().await;
                        break;
                    }
                }
            }
        });
        *self.flusher.lock() = Some(handle);
    }

    /// Signal the flusher and wait for its final flush.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.flusher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Drain all shards and ship the snapshot in batches. Failed batches
    /// are re-queued entry by entry until an entry exhausts its retries,
    /// after which it is dropped so a persistent cache outage cannot
    /// accumulate unbounded memory.
    pub async fn flush(&self) {
        let mut pending: Vec<(TrafficKey, TrafficEntry)> = Vec::new();
        for shard in &self.shards {
            let drained = {
                let mut entries = shard.lock();
                std::mem::take(&mut *entries)
            };
            pending.extend(
                drained
                    .into_iter()
                    .filter(|(_, e)| e.upload > 0 || e.download > 0),
            );
        }
        if pending.is_empty() {
            return;
        }

        let mut flushed = 0usize;
        let mut failed = 0usize;
        let mut dropped = 0usize;

        for batch in pending.chunks(self.config.batch_size.max(1)) {
            let deltas: Vec<TrafficDelta> = batch
                .iter()
                .map(|(key, entry)| TrafficDelta {
                    node_id: key.node_id,
                    subscription_id: key.subscription_id,
                    upload: entry.upload,
                    download: entry.download,
                })
                .collect();

            match self.cache.batch_increment(&deltas).await {
                Ok(()) => flushed += batch.len(),
                Err(e) => {
                    warn!(entries = batch.len(), error = %e, "traffic batch flush failed");
                    for (key, entry) in batch {
                        let retry_count = entry.retry_count + 1;
                        if retry_count >= self.config.max_retries {
                            dropped += 1;
                            error!(
                                node_id = key.node_id,
                                subscription_id = key.subscription_id,
                                upload = entry.upload,
                                download = entry.download,
                                retries = retry_count,
                                "dropping traffic entry after repeated flush failures"
                            );
                        } else {
                            failed += 1;
                            self.upsert(
                                *key,
                                TrafficEntry {
                                    upload: entry.upload,
                                    download: entry.download,
                                    retry_count,
                                },
                            );
                        }
                    }
                }
            }
        }

        if flushed > 0 || failed > 0 || dropped > 0 {
            info!(flushed, failed, dropped, "traffic flush complete");
        }
    }
}
