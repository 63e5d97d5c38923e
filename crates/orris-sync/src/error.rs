//! Error taxonomy for the sync core.
//!
//! Engines prefer forward progress over strict consistency: a failure on one
//! fan-out target never aborts the others, and transient infrastructure
//! errors are logged and absorbed wherever a later full sync recovers the
//! state. Only hard errors (`NotFound`, `Validation`, `Fatal`) surface to
//! admin callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Entity missing; surfaces to the caller, never retried internally.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Rejected input; surfaces to the caller.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transient cache/repository/pub-sub failure.
    #[error("transient io error: {0}")]
    TransientIo(String),

    /// The node has no live connection. Not an error to most callers; the
    /// reconnect full sync recovers.
    #[error("node {0} is offline")]
    NodeOffline(u64),

    /// The node's outbound queue is full or its transport closed mid-send.
    #[error("send to node {0} failed")]
    SendFailed(u64),

    /// Neither the recent-traffic cache nor historical stats produced a
    /// usable reading for the subscription.
    #[error("no traffic source available for subscription {0}")]
    TrafficSource(u64),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Programmer error or repository corruption, e.g. an entity vanishing
    /// mid-operation. Surfaces to the caller and is never retried.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
