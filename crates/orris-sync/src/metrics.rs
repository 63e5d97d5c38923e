//! Prometheus metrics for the sync core.
//!
//! Registered against the default registry, so the server's /metrics
//! endpoint exports them alongside its own.

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Failed sends to node agents by message type
    pub static ref SYNC_SEND_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "orris_sync_send_failures_total",
        "Failed sends to node agents by message type",
        &["type"]
    )
    .unwrap();
}
