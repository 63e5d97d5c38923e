//! Per-instance config version oracle.
//!
//! Versions are meaningful only within one control-plane instance: the event
//! bus carries change intent, never versions, so an agent that reconnects to
//! a different instance may observe the counter regress. Agents treat the
//! version purely as an ordering hint within one session.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::warn;

/// Monotonic global config version plus per-node last-acked versions.
/// All operations are lock-free.
#[derive(Debug, Default)]
pub struct VersionOracle {
    global: AtomicU64,
    acks: DashMap<u64, u64>,
}

impl VersionOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the global version and return the new value. Never rolled
    /// back, even when the send carrying it fails.
    pub fn increment(&self) -> u64 {
        self.global.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.global.load(Ordering::SeqCst)
    }

    /// Record the highest version acked by a node. Acks only move forward,
    /// and never past the global version.
    pub fn set_ack(&self, node_id: u64, version: u64) {
        let global = self.get();
        let version = if version > global {
            warn!(node_id, version, global, "ack ahead of global version, clamping");
            global
        } else {
            version
        };
        self.acks
            .entry(node_id)
            .and_modify(|current| {
                if version > *current {
                    *current = version;
                }
            })
            .or_insert(version);
    }

    /// Last version acked by the node; 0 if it never acked.
    pub fn get_ack(&self, node_id: u64) -> u64 {
        self.acks.get(&node_id).map(|v| *v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_increment_is_strictly_increasing() {
        let oracle = VersionOracle::new();
        let mut last = oracle.get();
        for _ in 0..100 {
            let next = oracle.increment();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_increment_under_contention() {
        let oracle = Arc::new(VersionOracle::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let oracle = Arc::clone(&oracle);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    oracle.increment();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(oracle.get(), 8000);
    }

    #[test]
    fn test_ack_defaults_to_zero() {
        let oracle = VersionOracle::new();
        assert_eq!(oracle.get_ack(7), 0);
    }

    #[test]
    fn test_ack_never_exceeds_global() {
        let oracle = VersionOracle::new();
        oracle.increment();
        oracle.increment();

        oracle.set_ack(7, 99);
        assert_eq!(oracle.get_ack(7), 2);
        assert!(oracle.get_ack(7) <= oracle.get());
    }

    #[test]
    fn test_ack_only_moves_forward() {
        let oracle = VersionOracle::new();
        for _ in 0..5 {
            oracle.increment();
        }

        oracle.set_ack(7, 4);
        oracle.set_ack(7, 2);
        assert_eq!(oracle.get_ack(7), 4);
    }
}
