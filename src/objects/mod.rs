//! Object types reconciled against the portal
//!
//! Each submodule is a [`reconcile::Planner`] for one object type: it reads
//! its document section, fetches the portal's current state, partitions and
//! builds [`PortalRequest`]s phase by phase.

pub mod global;
pub mod interfaces;
pub mod lag;
pub mod lan_segments;
pub mod ntp;
pub mod site_lists;
pub mod site_to_site_vpn;
pub mod sites;
pub mod static_routes;
pub mod vrrp;

use crate::pusher::PortalRequest;
use clap::ValueEnum;
use portal::Api;
use reconcile::{
    Error, Partition, Phase, Plan, Planner, Target, TargetId, TargetWork, apply_all,
    intent::value_kind,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// What to do with the objects a document lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Create or update the listed objects
    Configure,
    /// Remove the listed objects
    Deconfigure,
    /// Create objects without touching existing ones
    Create,
    /// Delete objects
    Delete,
    /// Attach global objects to sites
    Attach,
    /// Detach global objects from sites
    Detach,
    /// Add LAG members
    AddMembers,
    /// Remove LAG members
    RemoveMembers,
    /// Update LACP mode and timer
    UpdateLacp,
    /// Delete LAG subinterfaces
    DeleteSubinterfaces,
    /// Enable existing VRRP groups
    Enable,
    /// Configure only the circuits listed interfaces use
    ConfigureCircuits,
    /// Remove static routes from the circuits listed interfaces use
    DeconfigureCircuits,
    /// Configure interfaces and subinterfaces that set a LAN segment
    ConfigureLanInterfaces,
    /// Reset LAN interfaces and delete LAN subinterfaces
    DeconfigureLanInterfaces,
    /// Configure WAN interfaces and the circuits they use
    ConfigureWanCircuitsInterfaces,
    /// Remove circuit routes, then reset WAN interfaces
    DeconfigureWanCircuitsInterfaces,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_else(|| format!("{self:?}"));
        f.write_str(&name)
    }
}

/// Object types naasctl manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Global,
    LanSegments,
    SiteLists,
    Sites,
    Ntp,
    StaticRoutes,
    Interfaces,
    Lag,
    Vrrp,
    SiteToSiteVpn,
}

impl ObjectKind {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Global => "global objects",
            ObjectKind::LanSegments => "LAN segments",
            ObjectKind::SiteLists => "site lists",
            ObjectKind::Sites => "sites",
            ObjectKind::Ntp => "NTP",
            ObjectKind::StaticRoutes => "static routes",
            ObjectKind::Interfaces => "interfaces",
            ObjectKind::Lag => "LAG interfaces",
            ObjectKind::Vrrp => "VRRP",
            ObjectKind::SiteToSiteVpn => "site-to-site VPN",
        }
    }

    /// Operations this object type supports
    pub fn operations(&self) -> &'static [Operation] {
        use Operation as Op;
        match self {
            ObjectKind::Global
            | ObjectKind::Ntp
            | ObjectKind::StaticRoutes
            | ObjectKind::SiteToSiteVpn => &[Op::Configure, Op::Deconfigure],
            ObjectKind::Interfaces => &[
                Op::Configure,
                Op::Deconfigure,
                Op::ConfigureCircuits,
                Op::DeconfigureCircuits,
                Op::ConfigureLanInterfaces,
                Op::DeconfigureLanInterfaces,
                Op::ConfigureWanCircuitsInterfaces,
                Op::DeconfigureWanCircuitsInterfaces,
            ],
            ObjectKind::LanSegments | ObjectKind::SiteLists => {
                &[Op::Configure, Op::Deconfigure, Op::Create, Op::Delete]
            }
            ObjectKind::Sites => &[
                Op::Configure,
                Op::Deconfigure,
                Op::Create,
                Op::Delete,
                Op::Attach,
                Op::Detach,
            ],
            ObjectKind::Lag => &[
                Op::Configure,
                Op::Deconfigure,
                Op::AddMembers,
                Op::RemoveMembers,
                Op::UpdateLacp,
                Op::DeleteSubinterfaces,
            ],
            ObjectKind::Vrrp => &[Op::Configure, Op::Deconfigure, Op::Enable],
        }
    }

    pub fn supports(&self, operation: Operation) -> bool {
        self.operations().contains(&operation)
    }
}

/// Planner for whichever object type was picked on the command line
pub struct ObjectPlanner<'a> {
    ctx: PlanContext<'a>,
    kind: ObjectKind,
    operation: Operation,
}

impl<'a> ObjectPlanner<'a> {
    pub fn new(ctx: PlanContext<'a>, kind: ObjectKind, operation: Operation) -> Self {
        Self {
            ctx,
            kind,
            operation,
        }
    }
}

impl Planner for ObjectPlanner<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        if !self.kind.supports(self.operation) {
            return Err(unsupported(self.kind, self.operation));
        }
        let (ctx, op) = (self.ctx, self.operation);
        match self.kind {
            ObjectKind::Global => global::Global::new(ctx, op).plan(document),
            ObjectKind::LanSegments => lan_segments::LanSegments::new(ctx, op).plan(document),
            ObjectKind::SiteLists => site_lists::SiteLists::new(ctx, op).plan(document),
            ObjectKind::Sites => sites::Sites::new(ctx, op).plan(document),
            ObjectKind::Ntp => ntp::Ntp::new(ctx, op).plan(document),
            ObjectKind::StaticRoutes => static_routes::StaticRoutes::new(ctx, op).plan(document),
            ObjectKind::Interfaces => interfaces::Interfaces::new(ctx, op).plan(document),
            ObjectKind::Lag => lag::Lag::new(ctx, op).plan(document),
            ObjectKind::Vrrp => vrrp::Vrrp::new(ctx, op).plan(document),
            ObjectKind::SiteToSiteVpn => {
                site_to_site_vpn::SiteToSiteVpn::new(ctx, op).plan(document)
            }
        }
    }
}

/// Error for an operation an object type does not offer
pub fn unsupported(kind: ObjectKind, operation: Operation) -> Error {
    Error::load(format!("{} do not support '{operation}'", kind.name()))
}

/// What every planner needs besides the document
#[derive(Clone, Copy)]
pub struct PlanContext<'a> {
    pub api: &'a dyn Api,
    /// Concurrent snapshot fetches
    pub jobs: usize,
}

impl<'a> PlanContext<'a> {
    pub fn new(api: &'a dyn Api, jobs: usize) -> Self {
        Self { api, jobs }
    }
}

/// Target for portal-scoped objects
pub fn portal_target() -> Target {
    Target::new("portal", "portal")
}

/// Wrap a portal error from a state fetch
pub fn snapshot_error(target: impl Into<String>, err: &portal::Error) -> Error {
    Error::Snapshot {
        target: target.into(),
        message: err.to_string(),
    }
}

/// First present section among `keys` (for documents using alternate names)
pub fn section<'v>(document: &'v Value, keys: &[&str]) -> Option<&'v Value> {
    keys.iter()
        .find_map(|key| document.get(*key).filter(|v| !v.is_null()))
}

/// Array held under the first present key, or an empty slice
pub fn list_field<'v>(value: &'v Value, keys: &[&str]) -> &'v [Value] {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Element of `items` whose `name` field equals `name`
pub fn find_named<'v>(items: &'v [Value], name: &str) -> Option<&'v Value> {
    items
        .iter()
        .find(|item| item.get("name").and_then(Value::as_str) == Some(name))
}

/// Read a device- or site-scoped section: a list of single-key maps
/// `{name: config}`. Entries for the same device merge (lists are
/// concatenated, maps merged key by key) and keep first-seen order.
pub fn device_sections(section: &Value, key: &str) -> reconcile::Result<Vec<(String, Value)>> {
    let entries = match section {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        other => {
            return Err(Error::load(format!(
                "'{key}' must be a list of single-key maps, got {}",
                value_kind(other)
            )));
        }
    };

    let mut devices: Vec<(String, Value)> = Vec::new();
    for entry in entries {
        let Value::Object(map) = entry else {
            return Err(Error::load(format!(
                "each entry in '{key}' must be a map keyed by device or site name"
            )));
        };
        for (device, config) in map {
            match devices.iter_mut().find(|(name, _)| name == device) {
                Some((_, existing)) => merge_config(existing, config.clone()),
                None => devices.push((device.clone(), config.clone())),
            }
        }
    }
    Ok(devices)
}

/// A device's entry list: either the device value itself or the list under
/// `key` when the device value is a map
pub fn device_entries(config: &Value, key: &str) -> reconcile::Result<Vec<Value>> {
    match config {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => match map.get(key) {
            Some(Value::Array(items)) => Ok(items.clone()),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(other) => Err(Error::load(format!(
                "'{key}' must be a list, got {}",
                value_kind(other)
            ))),
        },
        Value::Null => Ok(Vec::new()),
        other => Err(Error::load(format!(
            "'{key}' device entry must be a list, got {}",
            value_kind(other)
        ))),
    }
}

/// Run `parse` over every device's section; the first malformed entry fails
/// the run before anything is fetched
pub fn check_devices<T, F>(devices: &[(String, Value)], parse: F) -> reconcile::Result<()>
where
    F: Fn(&Value) -> reconcile::Result<T>,
{
    devices
        .iter()
        .try_for_each(|(_, config)| parse(config).map(drop))
}

fn merge_config(into: &mut Value, other: Value) {
    match (into, other) {
        (Value::Array(existing), Value::Array(more)) => existing.extend(more),
        (Value::Object(existing), Value::Object(more)) => {
            for (key, value) in more {
                match existing.get_mut(&key) {
                    Some(slot) => merge_config(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, other) => *slot = other,
    }
}

/// One device being planned
pub struct Device<'a> {
    pub target: Target,
    pub id: i64,
    /// The device's merged section from the document
    pub config: &'a Value,
    /// The portal's `device` object
    pub info: &'a Value,
}

impl Device<'_> {
    /// Request patching this device with `{"edge": edge}`
    pub fn patch(&self, edge: Value) -> PortalRequest {
        PortalRequest::edge(self.id, edge)
    }
}

/// Plan a device-scoped section.
///
/// Device names are resolved once; unknown devices fail on their own.
/// Device state is fetched and planned concurrently. `plan_one` returns one
/// [`TargetWork`] per phase, in phase order.
pub fn plan_devices<F>(
    ctx: &PlanContext<'_>,
    devices: Vec<(String, Value)>,
    mut phases: Vec<Phase<PortalRequest>>,
    plan_one: F,
) -> reconcile::Result<Plan<PortalRequest>>
where
    F: Fn(&Device<'_>) -> reconcile::Result<Vec<TargetWork<PortalRequest>>> + Sync,
{
    let mut failures: Vec<(String, Error)> = Vec::new();
    let mut resolved: BTreeMap<TargetId, (Target, i64, Value)> = BTreeMap::new();

    if !devices.is_empty() {
        let ids: HashMap<String, i64> = ctx
            .api
            .devices()
            .map_err(|e| snapshot_error("portal", &e))?
            .into_iter()
            .map(|d| (d.hostname, d.device_id))
            .collect();

        for (name, config) in devices {
            match ids.get(&name) {
                Some(id) => {
                    let target = Target::new(*id, name);
                    resolved.insert(target.id.clone(), (target, *id, config));
                }
                None => failures.push((
                    name.clone(),
                    Error::Resolution {
                        kind: "device".to_string(),
                        name,
                    },
                )),
            }
        }
    }

    let results = apply_all(&resolved, ctx.jobs, |_, (target, id, config)| {
        let info = ctx
            .api
            .device_info(*id)
            .map_err(|e| snapshot_error(target.to_string(), &e))?;
        log::debug!("{target}: fetched device state");
        plan_one(&Device {
            target: target.clone(),
            id: *id,
            config,
            info: &info,
        })
    })?;

    for (id, result) in results {
        let name = resolved
            .get(&id)
            .map_or_else(|| id.to_string(), |(t, _, _)| t.name.clone());
        match result {
            Ok(works) => {
                for (phase, work) in phases.iter_mut().zip(works) {
                    phase.add(work);
                }
            }
            Err(err) if err.is_target_scoped() => failures.push((name, err)),
            Err(err) => return Err(err),
        }
    }

    let mut plan = reconcile::stage(phases)?;
    for (target, error) in failures {
        plan.fail_target(target, error);
    }
    Ok(plan)
}

/// Combine partitions of different object families on one target
pub fn merge_partitions(parts: impl IntoIterator<Item = Partition>) -> Partition {
    parts.into_iter().fold(Partition::default(), |mut all, part| {
        all.to_apply.extend(part.to_apply);
        all.skipped.extend(part.skipped);
        all.blocked.extend(part.blocked);
        all.unchanged.extend(part.unchanged);
        all
    })
}

/// Map with one key, for building nested payloads
pub fn single(key: impl Into<String>, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.into(), value);
    Value::Object(map)
}


#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{ChangeKind, Patch, PatchObject};
    use serde_json::json;

    #[test]
    fn test_device_sections_merge_same_device() {
        let section = json!([
            {"edge-1": {"ntps": [{"name": "a"}]}},
            {"edge-2": {"ntps": [{"name": "b"}]}},
            {"edge-1": {"ntps": [{"name": "c"}], "extra": true}},
        ]);
        let devices = device_sections(&section, "ntpGlobalObject").unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].0, "edge-1");
        assert_eq!(
            devices[0].1,
            json!({"ntps": [{"name": "a"}, {"name": "c"}], "extra": true})
        );
        assert_eq!(devices[1].0, "edge-2");
    }

    #[test]
    fn test_device_sections_rejects_bad_shapes() {
        assert!(matches!(
            device_sections(&json!({"edge-1": {}}), "interfaces"),
            Err(Error::Load(_))
        ));
        assert!(matches!(
            device_sections(&json!(["edge-1"]), "interfaces"),
            Err(Error::Load(_))
        ));
        assert!(device_sections(&Value::Null, "interfaces").unwrap().is_empty());
    }

    #[test]
    fn test_operation_display_matches_cli_name() {
        assert_eq!(Operation::AddMembers.to_string(), "add-members");
        assert_eq!(Operation::Configure.to_string(), "configure");
        assert_eq!(
            Operation::ConfigureWanCircuitsInterfaces.to_string(),
            "configure-wan-circuits-interfaces"
        );
    }

    #[test]
    fn test_check_devices_stops_at_first_bad_entry() {
        let devices = vec![
            ("edge-1".to_string(), json!({"ok": true})),
            ("edge-2".to_string(), json!({"ok": false})),
        ];
        let result = check_devices(&devices, |config| {
            if config["ok"] == true {
                Ok(())
            } else {
                Err(Error::load("bad entry"))
            }
        });
        assert!(matches!(result, Err(Error::Load(message)) if message == "bad entry"));
        assert!(check_devices(&devices[..1], |_| Ok(())).is_ok());
    }

    #[test]
    fn test_supported_operations() {
        assert!(ObjectKind::Lag.supports(Operation::UpdateLacp));
        assert!(!ObjectKind::Ntp.supports(Operation::Attach));
        assert!(ObjectKind::Sites.supports(Operation::Detach));
        assert!(ObjectKind::Interfaces.supports(Operation::DeconfigureLanInterfaces));
        assert!(!ObjectKind::Lag.supports(Operation::ConfigureCircuits));
    }

    #[test]
    fn test_object_planner_rejects_unsupported_operation() {
        let mock = portal::MockPortal::new();
        let planner = ObjectPlanner::new(
            PlanContext::new(&mock, 1),
            ObjectKind::Ntp,
            Operation::AddMembers,
        );
        assert!(matches!(planner.plan(&json!({})), Err(Error::Load(_))));
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_plan_devices_unknown_device_fails_alone() {
        let mock = testing::portal_with_devices(&[(1, "edge-1", json!({}))]);
        let ctx = PlanContext::new(&mock, 2);
        let devices = vec![
            ("edge-1".to_string(), json!({})),
            ("ghost".to_string(), json!({})),
        ];

        let plan = plan_devices(&ctx, devices, vec![Phase::new("configure")], |device| {
            let mut work = TargetWork::new(device.target.clone());
            work.push(
                Patch::new(device.patch(json!({})))
                    .with_object(PatchObject::new("x", ChangeKind::Updated)),
            );
            Ok(vec![work])
        })
        .unwrap();

        assert_eq!(plan.patch_count(), 1);
        assert_eq!(plan.failures.len(), 1);
        assert_eq!(plan.failures[0].target, "ghost");
        assert!(matches!(plan.failures[0].error, Error::Resolution { .. }));
    }

    #[test]
    fn test_plan_devices_load_error_aborts() {
        let mock = testing::portal_with_devices(&[(1, "edge-1", json!({}))]);
        let ctx = PlanContext::new(&mock, 1);
        let devices = vec![("edge-1".to_string(), json!({}))];

        let result = plan_devices(&ctx, devices, vec![Phase::new("configure")], |_| {
            Err(Error::load("object is missing required 'name' field"))
        });
        assert!(matches!(result, Err(Error::Load(_))));
    }

    #[test]
    fn test_plan_devices_no_devices_no_calls() {
        let mock = portal::MockPortal::new();
        let ctx = PlanContext::new(&mock, 4);
        let plan = plan_devices(&ctx, Vec::new(), vec![Phase::new("configure")], |_| {
            Ok(Vec::new())
        })
        .unwrap();
        assert!(plan.is_empty());
        assert!(plan.failures.is_empty());
    }
}
