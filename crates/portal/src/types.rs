//! Types returned by the portal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One edge device as listed in the edges summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSummary {
    pub device_id: i64,
    #[serde(alias = "name")]
    pub hostname: String,
}

/// Enterprise the session belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Enterprise {
    pub enterprise_id: i64,
    pub company_name: String,
}

/// Global LAN segment with its reference counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LanSegment {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub site_list_references: u64,
    pub edge_references: u64,
    pub associated_interfaces: u64,
}

/// Global site list. Reference counters are only filled in by the details
/// call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteList {
    pub id: i64,
    pub name: String,
    pub site_list_references: u64,
    pub edge_references: u64,
    pub policy_references: u64,
}

/// A site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Site {
    pub id: i64,
    pub name: String,
}

/// Kinds of global objects managed through the global config endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GlobalKind {
    PrefixSets,
    RoutingPolicies,
    Snmps,
    SyslogServers,
    Ntps,
    IpfixExporters,
    VpnProfiles,
}

impl GlobalKind {
    /// All kinds, in the order they are configured.
    pub const ALL: [GlobalKind; 7] = [
        GlobalKind::PrefixSets,
        GlobalKind::RoutingPolicies,
        GlobalKind::Snmps,
        GlobalKind::SyslogServers,
        GlobalKind::Ntps,
        GlobalKind::IpfixExporters,
        GlobalKind::VpnProfiles,
    ];

    /// Key of this kind in the global config patch body.
    #[must_use]
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::PrefixSets => "globalPrefixSets",
            Self::RoutingPolicies => "routingPolicies",
            Self::Snmps => "snmps",
            Self::SyslogServers => "syslogServers",
            Self::Ntps => "ntps",
            Self::IpfixExporters => "ipfixExporters",
            Self::VpnProfiles => "vpnProfiles",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::PrefixSets => "prefix set",
            Self::RoutingPolicies => "routing policy",
            Self::Snmps => "SNMP service",
            Self::SyslogServers => "syslog server",
            Self::Ntps => "NTP object",
            Self::IpfixExporters => "IPFIX exporter",
            Self::VpnProfiles => "VPN profile",
        }
    }
}

impl fmt::Display for GlobalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_summary_accepts_name_alias() {
        let device: DeviceSummary =
            serde_json::from_value(json!({"deviceId": 30, "name": "edge-1"})).unwrap();
        assert_eq!(device.device_id, 30);
        assert_eq!(device.hostname, "edge-1");
    }

    #[test]
    fn test_lan_segment_missing_counters_default_to_zero() {
        let segment: LanSegment =
            serde_json::from_value(json!({"id": 5, "name": "lan-a", "edgeReferences": 2})).unwrap();
        assert_eq!(segment.edge_references, 2);
        assert_eq!(segment.site_list_references, 0);
        assert_eq!(segment.associated_interfaces, 0);
    }

    #[test]
    fn test_config_keys_are_unique() {
        let mut keys: Vec<_> = GlobalKind::ALL.iter().map(GlobalKind::config_key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), GlobalKind::ALL.len());
    }
}
