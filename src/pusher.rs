//! Portal pusher - sends one planned request to the portal
//!
//! Every object type plans [`PortalRequest`]s; the pusher turns each into a
//! single portal call and maps portal errors onto push error kinds.

use portal::{Api, ErrorCategory};
use reconcile::{PatchPusher, PushError, Target};
use serde::Serialize;
use serde_json::Value;

/// One write against the portal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum PortalRequest {
    /// `{"edge": ...}` patch for one device
    DeviceConfig { device_id: i64, body: Value },
    /// Patch of the global configuration
    GlobalConfig { body: Value },
    CreateLanSegment { name: String, description: String },
    DeleteLanSegment { id: i64 },
    CreateSiteList { body: Value },
    DeleteSiteList { id: i64 },
    CreateSite { body: Value },
    DeleteSite { id: i64 },
    /// Attach/detach request for a site; the site id is looked up at push
    /// time since the site may have been created by an earlier phase
    SiteConfig { site: String, body: Value },
}

impl PortalRequest {
    /// Patch a device's configuration with `{"edge": edge}`
    pub fn edge(device_id: i64, edge: Value) -> Self {
        PortalRequest::DeviceConfig {
            device_id,
            body: serde_json::json!({ "edge": edge }),
        }
    }
}

/// Pushes planned requests through a portal [`Api`]
pub struct PortalPusher<'a> {
    api: &'a dyn Api,
}

impl<'a> PortalPusher<'a> {
    pub fn new(api: &'a dyn Api) -> Self {
        Self { api }
    }

    fn send(&self, request: &PortalRequest) -> portal::Result<()> {
        match request {
            PortalRequest::DeviceConfig { device_id, body } => {
                self.api.put_device_config(*device_id, body)
            }
            PortalRequest::GlobalConfig { body } => self.api.patch_global_config(body),
            PortalRequest::CreateLanSegment { name, description } => {
                self.api.create_lan_segment(name, description)
            }
            PortalRequest::DeleteLanSegment { id } => self.api.delete_lan_segment(*id),
            PortalRequest::CreateSiteList { body } => self.api.create_site_list(body),
            PortalRequest::DeleteSiteList { id } => self.api.delete_site_list(*id),
            PortalRequest::CreateSite { body } => self.api.create_site(body),
            PortalRequest::DeleteSite { id } => self.api.delete_site(*id),
            PortalRequest::SiteConfig { site, body } => match self.api.site_id(site)? {
                Some(id) => self.api.post_site_config(id, body),
                None => Err(portal::Error::not_found("site", site.as_str())),
            },
        }
    }
}

impl PatchPusher<PortalRequest> for PortalPusher<'_> {
    fn push(&self, target: &Target, request: &PortalRequest) -> Result<(), PushError> {
        self.send(request).map_err(|err| {
            log::debug!("{target}: portal error ({}): {err}", err.category());
            classify(request, &err)
        })
    }
}

/// Map a portal error onto a push error kind.
///
/// Site attach/detach rejections stay unclassified so the phase classifier
/// can tell "already attached" apart from real conflicts.
fn classify(request: &PortalRequest, err: &portal::Error) -> PushError {
    if matches!(request, PortalRequest::SiteConfig { .. }) {
        return PushError::unclassified(err.message());
    }
    match err.category() {
        ErrorCategory::InUse => PushError::in_use(err.message()),
        ErrorCategory::NotFound => PushError::not_found(err.message()),
        ErrorCategory::Auth | ErrorCategory::Network | ErrorCategory::Other => {
            PushError::unclassified(err.to_string())
        }
    }
}
