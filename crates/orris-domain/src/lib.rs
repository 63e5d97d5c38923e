//! Domain model for the Orris control plane.
//!
//! Entities here are plain values: nodes reference peer nodes by SID only,
//! never by in-memory pointer, so the graph is resolved at sync time by the
//! engines that need it.

pub mod node;
pub mod password;
pub mod plan;
pub mod subscription;

pub use node::*;
pub use password::*;
pub use plan::*;
pub use subscription::*;
