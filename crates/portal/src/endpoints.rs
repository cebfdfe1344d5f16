//! REST paths used by the client.
//!
//! Kept in one place so the HTTP client and [`crate::api::MockPortal`] log
//! the same request paths.

use crate::types::GlobalKind;

pub const LOGIN: &str = "/v1/auth/login";
pub const ENTERPRISE: &str = "/v1/enterprises/info";
pub const EDGES_SUMMARY: &str = "/v1/edges-summary";
pub const GLOBAL_CONFIG: &str = "/v1/global/config";
pub const IPSEC_PROFILES: &str = "/v1/global/ipsec-profile";
pub const LAN_SEGMENTS: &str = "/v1/global/lan-segments";
pub const SITE_LISTS: &str = "/v1/global/site-lists";
pub const SITES: &str = "/v1/sites";
pub const SITES_DETAILS: &str = "/v1/sites/details";

pub fn device(device_id: i64) -> String {
    format!("/v1/devices/{device_id}")
}

pub fn device_config(device_id: i64) -> String {
    format!("/v1/devices/{device_id}/config")
}

/// Summary listing for one kind of global object.
pub fn global_summary(kind: GlobalKind) -> String {
    match kind {
        GlobalKind::VpnProfiles => IPSEC_PROFILES.to_string(),
        GlobalKind::PrefixSets => "/v1/global/prefix-sets/summary".to_string(),
        GlobalKind::RoutingPolicies => "/v1/global/routing-policies/summary".to_string(),
        GlobalKind::Snmps => "/v1/global/snmps/summary".to_string(),
        GlobalKind::SyslogServers => "/v1/global/syslog-servers/summary".to_string(),
        GlobalKind::Ntps => "/v1/global/ntps/summary".to_string(),
        GlobalKind::IpfixExporters => "/v1/global/ipfix-exporters/summary".to_string(),
    }
}

pub fn lan_segment(id: i64) -> String {
    format!("{LAN_SEGMENTS}/{id}")
}

pub fn site_list(id: i64) -> String {
    format!("{SITE_LISTS}/{id}")
}

pub fn site(id: i64) -> String {
    format!("{SITES}/{id}")
}
