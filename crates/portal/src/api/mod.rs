//! Portal API trait and implementations.
//!
//! This module provides the [`Api`] trait, the blocking HTTP implementation
//! [`http::Client`], and [`MockPortal`] for running without a portal.
//!
//! # Testing
//!
//! ```
//! use portal::api::{Api, MockPortal};
//! use portal::DeviceSummary;
//!
//! let mock = MockPortal::new();
//! mock.add_device(DeviceSummary { device_id: 30, hostname: "edge-1".to_string() });
//!
//! assert_eq!(mock.device_id("edge-1").unwrap(), 30);
//! assert!(mock.device_id("edge-2").is_err());
//! ```

pub mod http;

use crate::endpoints;
use crate::error::{Error, Result};
use crate::types::{DeviceSummary, Enterprise, GlobalKind, LanSegment, Site, SiteList};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operations the portal offers.
///
/// Listing calls return the portal's current state; write calls apply one
/// request and return once the portal accepted it.
pub trait Api: Send + Sync {
    /// Enterprise of the current session.
    fn enterprise(&self) -> Result<Enterprise>;

    /// All edge devices.
    fn devices(&self) -> Result<Vec<DeviceSummary>>;

    /// Full configuration of one device (the `device` object).
    fn device_info(&self, device_id: i64) -> Result<Value>;

    /// Apply a configuration patch (`{"edge": ...}`) to one device.
    fn put_device_config(&self, device_id: i64, config: &Value) -> Result<()>;

    /// Summaries for one kind of global object, each an object with a `name`.
    fn global_summaries(&self, kind: GlobalKind) -> Result<Vec<Value>>;

    /// Apply a patch to the global configuration.
    fn patch_global_config(&self, config: &Value) -> Result<()>;

    fn lan_segments(&self) -> Result<Vec<LanSegment>>;

    fn create_lan_segment(&self, name: &str, description: &str) -> Result<()>;

    fn delete_lan_segment(&self, id: i64) -> Result<()>;

    /// All site lists (without reference counters).
    fn site_lists(&self) -> Result<Vec<SiteList>>;

    /// One site list including its reference counters.
    fn site_list(&self, id: i64) -> Result<SiteList>;

    fn create_site_list(&self, body: &Value) -> Result<()>;

    fn delete_site_list(&self, id: i64) -> Result<()>;

    fn sites(&self) -> Result<Vec<Site>>;

    fn create_site(&self, body: &Value) -> Result<()>;

    fn delete_site(&self, id: i64) -> Result<()>;

    /// Attach or detach global objects on a site.
    fn post_site_config(&self, site_id: i64, body: &Value) -> Result<()>;

    /// Resolve a device hostname to its id.
    fn device_id(&self, name: &str) -> Result<i64> {
        self.devices()?
            .into_iter()
            .find(|d| d.hostname == name)
            .map(|d| d.device_id)
            .ok_or_else(|| Error::not_found("device", name))
    }

    /// Resolve a site name to its id; `None` if it does not exist.
    fn site_id(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.sites()?.into_iter().find(|s| s.name == name).map(|s| s.id))
    }
}

/// Pull the list out of a listing response.
///
/// Accepts a bare array or an object holding exactly one array field, e.g.
/// `{"edgesSummary": [...]}`. Anything else is an empty list.
pub fn list_items(response: Value) -> Vec<Value> {
    match response {
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Turn the IPsec profile map (`{name: {count, ...}}`, possibly wrapped in
/// one field) into summaries carrying their name.
pub fn ipsec_profile_summaries(response: Value) -> Vec<Value> {
    let map = match response {
        Value::Object(map) => map,
        other => return list_items(other),
    };
    let wrapped = map.len() == 1
        && map
            .values()
            .next()
            .and_then(Value::as_object)
            .is_some_and(|inner| inner.values().all(Value::is_object));
    let profiles: Map<String, Value> = if wrapped {
        map.into_iter()
            .next()
            .and_then(|(_, v)| match v {
                Value::Object(inner) => Some(inner),
                _ => None,
            })
            .unwrap_or_default()
    } else {
        map
    };
    profiles
        .into_iter()
        .map(|(name, detail)| {
            let mut summary = detail.as_object().cloned().unwrap_or_default();
            summary.insert("name".to_string(), Value::String(name));
            Value::Object(summary)
        })
        .collect()
}

/// A write request recorded by [`MockPortal`].
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: &'static str,
    pub path: String,
    pub body: Value,
}

#[derive(Debug, Default)]
struct MockState {
    enterprise: Enterprise,
    devices: Vec<DeviceSummary>,
    device_info: HashMap<i64, Value>,
    summaries: HashMap<GlobalKind, Vec<Value>>,
    lan_segments: Vec<LanSegment>,
    site_lists: Vec<SiteList>,
    sites: Vec<Site>,
    failures: Vec<(String, u16, String)>,
    requests: Vec<Request>,
    reads: Vec<String>,
}

/// In-memory portal for tests and offline runs.
///
/// Listing calls return what was added and log their path; write calls are
/// recorded and succeed unless a failure was registered for their path.
#[derive(Debug, Clone, Default)]
pub struct MockPortal {
    state: Arc<Mutex<MockState>>,
}

impl MockPortal {
    /// Create a new empty mock portal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_enterprise(&self, enterprise_id: i64, company_name: &str) {
        self.state().enterprise = Enterprise {
            enterprise_id,
            company_name: company_name.to_string(),
        };
    }

    pub fn add_device(&self, device: DeviceSummary) {
        self.state().devices.push(device);
    }

    /// Add a device together with its configuration.
    pub fn add_device_with_info(&self, device_id: i64, hostname: &str, info: Value) {
        let mut state = self.state();
        state.devices.push(DeviceSummary {
            device_id,
            hostname: hostname.to_string(),
        });
        state.device_info.insert(device_id, info);
    }

    pub fn add_summary(&self, kind: GlobalKind, summary: Value) {
        self.state().summaries.entry(kind).or_default().push(summary);
    }

    pub fn add_lan_segment(&self, segment: LanSegment) {
        self.state().lan_segments.push(segment);
    }

    pub fn add_site_list(&self, site_list: SiteList) {
        self.state().site_lists.push(site_list);
    }

    pub fn add_site(&self, id: i64, name: &str) {
        self.state().sites.push(Site {
            id,
            name: name.to_string(),
        });
    }

    /// Make writes to `path` fail with the given status and message.
    pub fn fail_on(&self, path: impl Into<String>, status: u16, message: impl Into<String>) {
        self.state()
            .failures
            .push((path.into(), status, message.into()));
    }

    /// Write requests received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.state().requests.clone()
    }

    /// Write requests sent to one path.
    pub fn requests_to(&self, path: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    /// Paths of the listing and state calls received so far, in order.
    pub fn reads(&self) -> Vec<String> {
        self.state().reads.clone()
    }

    fn read(&self, path: impl Into<String>) -> MutexGuard<'_, MockState> {
        let mut state = self.state();
        state.reads.push(path.into());
        state
    }

    fn record(&self, method: &'static str, path: String, body: Value) -> Result<()> {
        let mut state = self.state();
        let failure = state
            .failures
            .iter()
            .find(|(p, _, _)| *p == path)
            .map(|(_, status, message)| (*status, message.clone()));
        if let Some((status, message)) = failure {
            return Err(Error::api(method, path, status, message));
        }
        state.requests.push(Request { method, path, body });
        Ok(())
    }
}

impl Api for MockPortal {
    fn enterprise(&self) -> Result<Enterprise> {
        Ok(self.read(endpoints::ENTERPRISE).enterprise.clone())
    }

    fn devices(&self) -> Result<Vec<DeviceSummary>> {
        Ok(self.read(endpoints::EDGES_SUMMARY).devices.clone())
    }

    fn device_info(&self, device_id: i64) -> Result<Value> {
        self.read(endpoints::device(device_id))
            .device_info
            .get(&device_id)
            .cloned()
            .ok_or_else(|| Error::api("GET", endpoints::device(device_id), 404, "device not found"))
    }

    fn put_device_config(&self, device_id: i64, config: &Value) -> Result<()> {
        self.record("PUT", endpoints::device_config(device_id), config.clone())
    }

    fn global_summaries(&self, kind: GlobalKind) -> Result<Vec<Value>> {
        Ok(self
            .read(endpoints::global_summary(kind))
            .summaries
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    fn patch_global_config(&self, config: &Value) -> Result<()> {
        self.record("PATCH", endpoints::GLOBAL_CONFIG.to_string(), config.clone())
    }

    fn lan_segments(&self) -> Result<Vec<LanSegment>> {
        Ok(self.read(endpoints::LAN_SEGMENTS).lan_segments.clone())
    }

    fn create_lan_segment(&self, name: &str, description: &str) -> Result<()> {
        self.record(
            "POST",
            endpoints::LAN_SEGMENTS.to_string(),
            json!({"name": name, "description": description}),
        )
    }

    fn delete_lan_segment(&self, id: i64) -> Result<()> {
        self.record("DELETE", endpoints::lan_segment(id), Value::Null)
    }

    fn site_lists(&self) -> Result<Vec<SiteList>> {
        Ok(self
            .read(endpoints::SITE_LISTS)
            .site_lists
            .iter()
            .map(|l| SiteList {
                id: l.id,
                name: l.name.clone(),
                ..Default::default()
            })
            .collect())
    }

    fn site_list(&self, id: i64) -> Result<SiteList> {
        self.read(endpoints::site_list(id))
            .site_lists
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| Error::api("GET", endpoints::site_list(id), 404, "site list not found"))
    }

    fn create_site_list(&self, body: &Value) -> Result<()> {
        self.record("POST", endpoints::SITE_LISTS.to_string(), body.clone())
    }

    fn delete_site_list(&self, id: i64) -> Result<()> {
        self.record("DELETE", endpoints::site_list(id), Value::Null)
    }

    fn sites(&self) -> Result<Vec<Site>> {
        Ok(self.read(endpoints::SITES_DETAILS).sites.clone())
    }

    fn create_site(&self, body: &Value) -> Result<()> {
        self.record("POST", endpoints::SITES.to_string(), body.clone())
    }

    fn delete_site(&self, id: i64) -> Result<()> {
        self.record("DELETE", endpoints::site(id), Value::Null)
    }

    fn post_site_config(&self, site_id: i64, body: &Value) -> Result<()> {
        self.record("POST", endpoints::site(site_id), body.clone())
    }
}
