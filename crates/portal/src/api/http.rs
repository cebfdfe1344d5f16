//! Blocking HTTP client for the portal.
//!
//! The agent is built with `http_status_as_error(false)` so error bodies can
//! be read; the portal's message is what tells "in use" apart from other
//! rejections.

use super::{Api, ipsec_profile_summaries, list_items};
use crate::endpoints;
use crate::error::{Error, Result};
use crate::types::{DeviceSummary, Enterprise, GlobalKind, LanSegment, Site, SiteList};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

/// Default portal address.
pub const DEFAULT_HOST: &str = "https://api.graphiant.com";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Portal client over HTTPS.
///
/// # Example
///
/// ```no_run
/// use portal::api::{Api, http::Client};
///
/// let client = Client::new("api.graphiant.com").login("admin", "secret").unwrap();
/// for device in client.devices().unwrap() {
///     println!("{} ({})", device.hostname, device.device_id);
/// }
/// ```
pub struct Client {
    /// HTTP agent for requests.
    agent: ureq::Agent,
    /// Portal API base URL.
    api_base: String,
    /// Bearer token, once logged in.
    token: Option<String>,
}

impl Client {
    /// Create a client for a portal host. A missing scheme means https.
    #[must_use]
    pub fn new(host: &str) -> Self {
        let host = host.trim().trim_end_matches('/');
        let api_base = if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        Self::with_api_base(api_base)
    }

    /// Create a client with a custom API base (for testing).
    #[must_use]
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        Self {
            agent,
            api_base: api_base.into(),
            token: None,
        }
    }

    /// Get the current API base URL.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Authenticate and keep the session token.
    pub fn login(mut self, username: &str, password: &str) -> Result<Self> {
        let credentials = json!({"username": username, "password": password});
        let response = self
            .send("POST", endpoints::LOGIN, Some(&credentials))
            .map_err(|e| Error::Auth(e.message()))?;
        let token = response
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth("login response carried no token".to_string()))?;
        log::debug!("Logged in to {} as {username}", self.api_base);
        self.token = Some(token.to_string());
        Ok(self)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn authorize<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        let request = request
            .header("Accept", "application/json")
            .header("User-Agent", concat!("naasctl/", env!("CARGO_PKG_VERSION")));
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {token}").as_str()),
            None => request,
        }
    }

    /// Issue one request and parse the JSON body. Empty bodies read as null.
    fn send(&self, method: &'static str, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.url(path);
        log::debug!("{method} {path}");

        let mut response = match method {
            "GET" => self.authorize(self.agent.get(&url)).call()?,
            "DELETE" => self.authorize(self.agent.delete(&url)).call()?,
            "POST" => self
                .authorize(self.agent.post(&url))
                .send_json(body.unwrap_or(&Value::Null))?,
            "PUT" => self
                .authorize(self.agent.put(&url))
                .send_json(body.unwrap_or(&Value::Null))?,
            "PATCH" => self
                .authorize(self.agent.patch(&url))
                .send_json(body.unwrap_or(&Value::Null))?,
            other => return Err(Error::http(format!("unsupported method {other}"), None)),
        };

        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string()?;
        if status >= 400 {
            log::debug!("{method} {path} -> {status}: {text}");
            return Err(Error::api(method, path, status, error_message(status, &text)));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn get(&self, path: &str) -> Result<Value> {
        self.send("GET", path, None)
    }

    fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        list_items(self.get(path)?)
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Error::from))
            .collect()
    }
}

/// Extract the portal's message from an error body.
fn error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error", "detail"] {
            if let Some(message) = value.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        body.to_string()
    }
}

/// Unwrap a single-object response such as `{"device": {...}}`.
fn unwrap_object(response: Value, key: &str) -> Value {
    match response {
        Value::Object(mut map) if map.get(key).is_some_and(Value::is_object) => {
            map.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

impl Api for Client {
    fn enterprise(&self) -> Result<Enterprise> {
        let response = unwrap_object(self.get(endpoints::ENTERPRISE)?, "enterprise");
        Ok(serde_json::from_value(response)?)
    }

    fn devices(&self) -> Result<Vec<DeviceSummary>> {
        self.get_list(endpoints::EDGES_SUMMARY)
    }

    fn device_info(&self, device_id: i64) -> Result<Value> {
        Ok(unwrap_object(self.get(&endpoints::device(device_id))?, "device"))
    }

    fn put_device_config(&self, device_id: i64, config: &Value) -> Result<()> {
        self.send("PUT", &endpoints::device_config(device_id), Some(config))
            .map(drop)
    }

    fn global_summaries(&self, kind: GlobalKind) -> Result<Vec<Value>> {
        let response = self.get(&endpoints::global_summary(kind))?;
        Ok(match kind {
            GlobalKind::VpnProfiles => ipsec_profile_summaries(response),
            _ => list_items(response),
        })
    }

    fn patch_global_config(&self, config: &Value) -> Result<()> {
        self.send("PATCH", endpoints::GLOBAL_CONFIG, Some(config)).map(drop)
    }

    fn lan_segments(&self) -> Result<Vec<LanSegment>> {
        self.get_list(endpoints::LAN_SEGMENTS)
    }

    fn create_lan_segment(&self, name: &str, description: &str) -> Result<()> {
        let body = json!({"name": name, "description": description});
        self.send("POST", endpoints::LAN_SEGMENTS, Some(&body)).map(drop)
    }

    fn delete_lan_segment(&self, id: i64) -> Result<()> {
        self.send("DELETE", &endpoints::lan_segment(id), None).map(drop)
    }

    fn site_lists(&self) -> Result<Vec<SiteList>> {
        self.get_list(endpoints::SITE_LISTS)
    }

    fn site_list(&self, id: i64) -> Result<SiteList> {
        let response = unwrap_object(self.get(&endpoints::site_list(id))?, "siteList");
        Ok(serde_json::from_value(response)?)
    }

    fn create_site_list(&self, body: &Value) -> Result<()> {
        self.send("POST", endpoints::SITE_LISTS, Some(body)).map(drop)
    }

    fn delete_site_list(&self, id: i64) -> Result<()> {
        self.send("DELETE", &endpoints::site_list(id), None).map(drop)
    }

    fn sites(&self) -> Result<Vec<Site>> {
        self.get_list(endpoints::SITES_DETAILS)
    }

    fn create_site(&self, body: &Value) -> Result<()> {
        self.send("POST", endpoints::SITES, Some(body)).map(drop)
    }

    fn delete_site(&self, id: i64) -> Result<()> {
        self.send("DELETE", &endpoints::site(id), None).map(drop)
    }

    fn post_site_config(&self, site_id: i64, body: &Value) -> Result<()> {
        self.send("POST", &endpoints::site(site_id), Some(body)).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_adds_scheme() {
        assert_eq!(Client::new("api.graphiant.com").api_base(), "https://api.graphiant.com");
        assert_eq!(
            Client::new("http://localhost:8080/").api_base(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_url() {
        let client = Client::with_api_base("http://portal.test");
        assert_eq!(client.url("/v1/edges-summary"), "http://portal.test/v1/edges-summary");
    }

    #[test]
    fn test_error_message_prefers_json_message() {
        assert_eq!(
            error_message(400, r#"{"message": "prefix set is in use"}"#),
            "prefix set is in use"
        );
        assert_eq!(error_message(500, r#"{"error": "boom"}"#), "boom");
        assert_eq!(error_message(502, "bad gateway"), "bad gateway");
        assert_eq!(error_message(503, ""), "HTTP 503");
    }

    #[test]
    fn test_unwrap_object() {
        let device = unwrap_object(json!({"device": {"id": 1}}), "device");
        assert_eq!(device, json!({"id": 1}));
        let bare = unwrap_object(json!({"id": 1}), "device");
        assert_eq!(bare, json!({"id": 1}));
    }

    #[test]
    fn test_unreachable_portal_is_network_error() {
        let client = Client::with_api_base("http://127.0.0.1:9");
        let err = client.devices().unwrap_err();
        assert!(err.is_retryable());
    }
}
