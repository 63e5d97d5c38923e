use serde::{Deserialize, Serialize};

/// Proxy protocol terminated by a node agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Shadowsocks,
    Trojan,
    AnyTls,
    Vless,
    Vmess,
    Hysteria2,
    Tuic,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Trojan => "trojan",
            Protocol::AnyTls => "anytls",
            Protocol::Vless => "vless",
            Protocol::Vmess => "vmess",
            Protocol::Hysteria2 => "hysteria2",
            Protocol::Tuic => "tuic",
        }
    }

    /// Whether nodes speaking this protocol can terminate relay traffic for
    /// peer nodes. Only these protocols receive the synthetic
    /// node-forwarding authorization.
    pub fn supports_forwarding(&self) -> bool {
        matches!(
            self,
            Protocol::Shadowsocks | Protocol::Trojan | Protocol::AnyTls
        )
    }
}

/// A single routing rule. Traffic matching `domains` is sent through the
/// peer named by `outbound_node_sid`, or out the default outbound when none
/// is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub domains: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_node_sid: Option<String>,
}

/// Per-node routing configuration. Peers are referenced by SID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub rules: Vec<RouteRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_outbound_node_sid: Option<String>,
}

impl RouteConfig {
    /// Peer SIDs referenced by this route config, in first-seen order.
    pub fn referenced_node_sids(&self) -> Vec<String> {
        let mut sids = Vec::new();
        for rule in &self.rules {
            if let Some(sid) = &rule.outbound_node_sid {
                if !sids.contains(sid) {
                    sids.push(sid.clone());
                }
            }
        }
        if let Some(sid) = &self.default_outbound_node_sid {
            if !sids.contains(sid) {
                sids.push(sid.clone());
            }
        }
        sids
    }
}

/// A DNS upstream; `via_node_sid` tunnels queries through a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsServer {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_node_sid: Option<String>,
}

/// Per-node DNS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    pub servers: Vec<DnsServer>,
}

impl DnsConfig {
    /// Peer SIDs referenced by this DNS config, in first-seen order.
    pub fn referenced_node_sids(&self) -> Vec<String> {
        let mut sids = Vec::new();
        for server in &self.servers {
            if let Some(sid) = &server.via_node_sid {
                if !sids.contains(sid) {
                    sids.push(sid.clone());
                }
            }
        }
        sids
    }
}

/// A proxy node managed by the control plane.
///
/// `id` is the internal numeric key; `sid` is the stable externally visible
/// identifier used on the wire and in peer references. `token_hash` is the
/// hash of the agent's access token and doubles as the keying material for
/// peer-forwarding passwords.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: u64,
    pub sid: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Cipher name; meaningful for Shadowsocks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_method: Option<String>,
    pub token_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_config: Option<RouteConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<DnsConfig>,
}

impl Node {
    /// Union of the peer SIDs referenced by the route and DNS configs,
    /// deduplicated preserving first-seen order (route refs first).
    pub fn referenced_peer_sids(&self) -> Vec<String> {
        let mut sids = Vec::new();
        if let Some(route) = &self.route_config {
            for sid in route.referenced_node_sids() {
                if !sids.contains(&sid) {
                    sids.push(sid);
                }
            }
        }
        if let Some(dns) = &self.dns_config {
            for sid in dns.referenced_node_sids() {
                if !sids.contains(&sid) {
                    sids.push(sid);
                }
            }
        }
        sids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(sids: &[&str]) -> RouteConfig {
        RouteConfig {
            rules: sids
                .iter()
                .map(|sid| RouteRule {
                    domains: vec!["example.com".to_string()],
                    outbound_node_sid: Some(sid.to_string()),
                })
                .collect(),
            default_outbound_node_sid: None,
        }
    }

    #[test]
    fn test_protocol_forwarding_support() {
        assert!(Protocol::Shadowsocks.supports_forwarding());
        assert!(Protocol::Trojan.supports_forwarding());
        assert!(Protocol::AnyTls.supports_forwarding());
        assert!(!Protocol::Vless.supports_forwarding());
        assert!(!Protocol::Vmess.supports_forwarding());
        assert!(!Protocol::Hysteria2.supports_forwarding());
        assert!(!Protocol::Tuic.supports_forwarding());
    }

    #[test]
    fn test_referenced_peer_sids_dedup_first_seen_order() {
        let node = Node {
            id: 1,
            sid: "n_1".to_string(),
            name: "node-1".to_string(),
            address: "198.51.100.7".to_string(),
            port: 8388,
            protocol: Protocol::Shadowsocks,
            encryption_method: Some("aes-256-gcm".to_string()),
            token_hash: "t1".to_string(),
            route_config: Some(route(&["n_b", "n_a", "n_b"])),
            dns_config: Some(DnsConfig {
                servers: vec![
                    DnsServer {
                        address: "1.1.1.1".to_string(),
                        via_node_sid: Some("n_a".to_string()),
                    },
                    DnsServer {
                        address: "8.8.8.8".to_string(),
                        via_node_sid: Some("n_c".to_string()),
                    },
                ],
            }),
        };

        assert_eq!(node.referenced_peer_sids(), vec!["n_b", "n_a", "n_c"]);
    }

    #[test]
    fn test_referenced_peer_sids_empty_without_configs() {
        let node = Node {
            id: 2,
            sid: "n_2".to_string(),
            name: "node-2".to_string(),
            address: "198.51.100.8".to_string(),
            port: 443,
            protocol: Protocol::Trojan,
            encryption_method: None,
            token_hash: "t2".to_string(),
            route_config: None,
            dns_config: None,
        };

        assert!(node.referenced_peer_sids().is_empty());
    }

    #[test]
    fn test_protocol_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Protocol::AnyTls).unwrap(),
            "\"anytls\""
        );
        assert_eq!(
            serde_json::to_string(&Protocol::Hysteria2).unwrap(),
            "\"hysteria2\""
        );
    }
}
