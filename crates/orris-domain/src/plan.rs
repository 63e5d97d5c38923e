use serde::{Deserialize, Serialize};

/// Commercial plan type. Traffic quota enforcement applies to `Node` plans
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Node,
    Forward,
    Hybrid,
}

/// Plan feature set. A zero limit (or the explicit flag) means unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlanFeatures {
    /// Maximum concurrent devices; 0 means no limit.
    pub device_limit: i64,
    /// Per-connection speed cap in bytes/s; 0 means no cap.
    pub speed_limit: i64,
    /// Traffic quota in bytes; 0 means unlimited.
    pub traffic_limit_bytes: u64,
    pub unlimited_traffic: bool,
}

impl PlanFeatures {
    pub fn traffic_is_unlimited(&self) -> bool {
        self.unlimited_traffic || self.traffic_limit_bytes == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: u64,
    pub name: String,
    pub plan_type: PlanType,
    pub features: PlanFeatures,
}

/// A resource group links a set of plans to the set of nodes serving them.
/// Inactive groups are skipped when resolving subscription recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub id: u64,
    pub name: String,
    pub is_active: bool,
    pub plan_ids: Vec<u64>,
    pub node_ids: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_unlimited_by_flag_or_zero_limit() {
        let unlimited_flag = PlanFeatures {
            traffic_limit_bytes: 1,
            unlimited_traffic: true,
            ..Default::default()
        };
        assert!(unlimited_flag.traffic_is_unlimited());

        let zero_limit = PlanFeatures::default();
        assert!(zero_limit.traffic_is_unlimited());

        let limited = PlanFeatures {
            traffic_limit_bytes: 10 * 1024 * 1024 * 1024,
            ..Default::default()
        };
        assert!(!limited.traffic_is_unlimited());
    }
}
