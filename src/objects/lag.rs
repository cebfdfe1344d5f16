//! LAG interfaces (`edge.lagInterfaces`)
//!
//! Members are named by interface in the document and pushed as interface
//! ids. Member and LACP operations only push what differs from the device:
//! `add-members` sends the membership with the missing members added,
//! `remove-members` the membership without the present ones.

use super::{
    Device, ObjectKind, Operation, PlanContext, device_entries, device_sections, list_field,
    merge_partitions, plan_devices, section, single, unsupported,
};
use crate::pusher::PortalRequest;
use reconcile::{
    Action, Attributes, ChangeKind, Error, IntentRecord, Mode, Normalizer, Partition, Patch,
    PatchObject, Phase, Plan, Planner, Summary, TargetWork, never_in_use, partition,
    work_combined,
};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const SECTION: &str = "lagInterfaces";

pub const SUBINTERFACES_PHASE: &str = "subinterfaces";
pub const LAGS_PHASE: &str = "lags";

pub struct Lag<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> Lag<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }
}

impl Planner for Lag<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let operation = self.operation;
        if !ObjectKind::Lag.supports(operation) {
            return Err(unsupported(ObjectKind::Lag, operation));
        }
        let sections =
            device_sections(section(document, &[SECTION]).unwrap_or(&Value::Null), SECTION)?;
        let devices = sections
            .into_iter()
            .map(|(name, config)| {
                let entries = device_entries(&config, SECTION)?;
                for entry in &entries {
                    LagIntent::parse(entry)?;
                }
                Ok((name, Value::Array(entries)))
            })
            .collect::<reconcile::Result<Vec<_>>>()?;

        let phases = if operation == Operation::Deconfigure {
            vec![Phase::new(SUBINTERFACES_PHASE), Phase::new(LAGS_PHASE)]
        } else {
            vec![Phase::new(operation.to_string())]
        };

        plan_devices(&self.ctx, devices, phases, |device| {
            let lags = LagIntent::from_config(device.config)?;
            let state = DeviceLags::from_info(device.info);
            match operation {
                Operation::Configure => Ok(vec![configure(device, &lags, &state)?]),
                Operation::AddMembers => {
                    Ok(vec![change_members(device, &lags, &state, Mode::Create)?])
                }
                Operation::RemoveMembers => {
                    Ok(vec![change_members(device, &lags, &state, Mode::Delete)?])
                }
                Operation::UpdateLacp => Ok(vec![update_lacp(device, &lags, &state)]),
                Operation::DeleteSubinterfaces => {
                    Ok(vec![delete_subinterfaces(device, &lags, &state)])
                }
                Operation::Deconfigure => Ok(deconfigure(device, &lags, &state)),
                other => Err(unsupported(ObjectKind::Lag, other)),
            }
        })
    }
}

// ============================================================================
// Document
// ============================================================================

/// One LAG as written in the document
#[derive(Debug, Clone, PartialEq)]
struct LagIntent {
    name: String,
    alias: Option<String>,
    members: Vec<String>,
    lacp_mode: Option<String>,
    lacp_timer: Option<String>,
    /// `(vlan, attributes without vlan)`
    subinterfaces: Vec<(String, Attributes)>,
}

impl LagIntent {
    fn parse(entry: &Value) -> reconcile::Result<Self> {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::load("LAG entry is missing 'name'"))?;
        let text = |key: &str| entry.get(key).and_then(Value::as_str).map(str::to_string);

        let members = match entry.get("lagMembers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|m| {
                    m.as_str().map(str::to_string).ok_or_else(|| {
                        Error::load(format!("LAG '{name}': 'lagMembers' must list interface names"))
                    })
                })
                .collect::<reconcile::Result<Vec<_>>>()?,
            Some(_) => {
                return Err(Error::load(format!("LAG '{name}': 'lagMembers' must be a list")));
            }
        };

        let subinterfaces = list_field(entry, &["subinterfaces", "sub_interfaces"])
            .iter()
            .map(|sub| {
                let vlan = vlan_key(sub.get("vlan")).ok_or_else(|| {
                    Error::load(format!("LAG '{name}': subinterface is missing 'vlan'"))
                })?;
                let mut attributes = sub.as_object().cloned().unwrap_or_default();
                attributes.remove("vlan");
                Ok((vlan, attributes))
            })
            .collect::<reconcile::Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            alias: text("alias"),
            members,
            lacp_mode: text("lacpMode").map(|m| m.to_uppercase()),
            lacp_timer: text("lacpTimer").map(|t| t.to_uppercase()),
            subinterfaces,
        })
    }

    fn from_config(config: &Value) -> reconcile::Result<Vec<Self>> {
        config
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(Self::parse)
            .collect()
    }

    fn sub_name(&self, vlan: &str) -> String {
        format!("{}.{vlan}", self.name)
    }

    fn member_name(&self, member: &str) -> String {
        format!("{}/{member}", self.name)
    }
}

fn vlan_key(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

// ============================================================================
// Device state
// ============================================================================

/// A LAG as the device reports it
#[derive(Debug, Clone, Default, PartialEq)]
struct ExistingLag {
    alias: Option<String>,
    member_ids: BTreeSet<i64>,
    lacp_mode: Option<String>,
    lacp_timer: Option<String>,
    /// vlan -> subinterface object
    subinterfaces: BTreeMap<String, Value>,
}

/// LAGs on one device plus the interface name/id mapping
#[derive(Debug, Default)]
struct DeviceLags {
    lags: BTreeMap<String, ExistingLag>,
    ids: HashMap<String, i64>,
    names: HashMap<i64, String>,
}

impl DeviceLags {
    fn from_info(info: &Value) -> Self {
        let mut state = DeviceLags::default();
        let interfaces = list_field(info, &["interfaces"]);

        for interface in interfaces {
            let Some(name) = interface.get("name").and_then(Value::as_str) else {
                continue;
            };
            if let Some(id) = interface.get("id").and_then(Value::as_i64) {
                state.ids.insert(name.to_string(), id);
                state.names.insert(id, name.to_string());
            }
            let Some(lag) = interface
                .get("lagInterface")
                .or_else(|| interface.get("lag_interface"))
                .filter(|l| l.is_object())
            else {
                continue;
            };

            let lacp = lag
                .get("lacpConfig")
                .or_else(|| lag.get("lacp_config"))
                .unwrap_or(&Value::Null);
            let text = |value: &Value, key: &str| {
                value.get(key).and_then(Value::as_str).map(str::to_uppercase)
            };
            let member_ids = list_field(lag, &["members"])
                .iter()
                .filter_map(|m| m.as_i64().or_else(|| m.get("id").and_then(Value::as_i64)))
                .collect();
            let subinterfaces = list_field(interface, &["subinterfaces", "sub_interfaces"])
                .iter()
                .filter_map(|sub| Some((vlan_key(sub.get("vlan"))?, sub.clone())))
                .collect();

            state.lags.insert(
                name.to_string(),
                ExistingLag {
                    alias: interface.get("alias").and_then(Value::as_str).map(str::to_string),
                    member_ids,
                    lacp_mode: text(lacp, "mode"),
                    lacp_timer: text(lacp, "timer"),
                    subinterfaces,
                },
            );
        }

        // Some devices list LAG subinterfaces as top-level `LAG1.101` entries
        for interface in interfaces {
            let Some((parent, vlan)) = interface
                .get("name")
                .and_then(Value::as_str)
                .and_then(|n| n.split_once('.'))
            else {
                continue;
            };
            if let Some(lag) = state.lags.get_mut(parent) {
                lag.subinterfaces
                    .entry(vlan.to_string())
                    .or_insert_with(|| interface.clone());
            }
        }
        state
    }

    fn member_names(&self, lag: &ExistingLag) -> Vec<String> {
        let mut names: Vec<String> = lag
            .member_ids
            .iter()
            .map(|id| self.names.get(id).cloned().unwrap_or_else(|| id.to_string()))
            .collect();
        names.sort();
        names
    }

    fn member_id(&self, lag: &LagIntent, member: &str) -> reconcile::Result<i64> {
        self.ids.get(member).copied().ok_or_else(|| Error::Resolution {
            kind: "interface".to_string(),
            name: format!("{member} (member of {})", lag.name),
        })
    }

    fn lag_summaries(&self) -> Vec<Summary> {
        self.lags
            .iter()
            .map(|(name, lag)| {
                let mut raw = Map::new();
                raw.insert("lagMembers".to_string(), json!(self.member_names(lag)));
                for (key, value) in [
                    ("alias", &lag.alias),
                    ("lacpMode", &lag.lacp_mode),
                    ("lacpTimer", &lag.lacp_timer),
                ] {
                    if let Some(value) = value {
                        raw.insert(key.to_string(), Value::from(value.as_str()));
                    }
                }
                Summary::new(name).with_raw(Value::Object(raw))
            })
            .collect()
    }

    fn sub_summaries(&self) -> Vec<Summary> {
        self.lags
            .iter()
            .flat_map(|(name, lag)| {
                lag.subinterfaces.iter().map(move |(vlan, sub)| {
                    let mut raw = sub.as_object().cloned().unwrap_or_default();
                    raw.remove("vlan");
                    raw.remove("name");
                    Summary::new(format!("{name}.{vlan}")).with_raw(Value::Object(raw))
                })
            })
            .collect()
    }
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Default)]
struct LagPatch {
    body: Attributes,
    subinterfaces: Map<String, Value>,
    deleted: bool,
}

/// `{"lagInterfaces": {...}}` for one device
#[derive(Default)]
struct LagsPatch {
    lags: BTreeMap<String, LagPatch>,
}

impl LagsPatch {
    fn lag(&mut self, name: &str) -> &mut LagPatch {
        self.lags.entry(name.to_string()).or_default()
    }

    fn lag_interface(&mut self, name: &str, key: &str, value: Value) {
        let body = &mut self.lag(name).body;
        let lag = body
            .entry("lagInterface")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(lag) = lag {
            lag.insert(key.to_string(), value);
        }
    }

    fn into_value(self) -> Value {
        let lags: Map<String, Value> = self
            .lags
            .into_iter()
            .map(|(name, patch)| {
                if patch.deleted {
                    return (name, json!({ "interface": null }));
                }
                let mut body = patch.body;
                if !patch.subinterfaces.is_empty() {
                    body.insert("subinterfaces".to_string(), Value::Object(patch.subinterfaces));
                }
                (name, json!({ "interface": body }))
            })
            .collect();
        single(SECTION, Value::Object(lags))
    }
}

fn member_ids_value(ids: impl IntoIterator<Item = i64>) -> Value {
    let ids: BTreeSet<i64> = ids.into_iter().collect();
    json!(ids.into_iter().collect::<Vec<_>>())
}

/// Alias is left out when the device already has it, since the portal
/// rejects re-assigning an alias to the interface holding it
fn drop_same_alias(attributes: &mut Attributes, existing: Option<&str>) {
    if existing.is_some() && attributes.get("alias").and_then(Value::as_str) == existing {
        attributes.remove("alias");
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Create or update LAGs and their subinterfaces
fn configure(
    device: &Device<'_>,
    lags: &[LagIntent],
    state: &DeviceLags,
) -> reconcile::Result<TargetWork<PortalRequest>> {
    let mut lag_records = Vec::new();
    let mut sub_records = Vec::new();
    let mut owners: HashMap<String, (&LagIntent, Option<String>)> = HashMap::new();

    for lag in lags {
        for member in &lag.members {
            state.member_id(lag, member)?;
        }
        let mut members = lag.members.clone();
        members.sort();
        let mut attributes = Attributes::new();
        attributes.insert("lagMembers".to_string(), json!(members));
        for (key, value) in [
            ("alias", &lag.alias),
            ("lacpMode", &lag.lacp_mode),
            ("lacpTimer", &lag.lacp_timer),
        ] {
            if let Some(value) = value {
                attributes.insert(key.to_string(), Value::from(value.as_str()));
            }
        }
        owners.insert(lag.name.clone(), (lag, None));
        lag_records.push(IntentRecord::new(&lag.name, attributes));

        for (vlan, attributes) in &lag.subinterfaces {
            let name = lag.sub_name(vlan);
            owners.insert(name.clone(), (lag, Some(vlan.clone())));
            sub_records.push(IntentRecord::new(name, attributes.clone()));
        }
    }

    let normalizer = Normalizer::new();
    let free = never_in_use::<Summary>;
    let result = merge_partitions([
        partition(&lag_records, &state.lag_summaries(), free, Mode::Create, &normalizer),
        partition(&sub_records, &state.sub_summaries(), free, Mode::Create, &normalizer),
    ]);

    let mut patch = LagsPatch::default();
    for action in &result.to_apply {
        let (Some(record), Some((lag, vlan))) = (action.record(), owners.get(action.name())) else {
            continue;
        };
        let existing = state.lags.get(&lag.name);
        match vlan {
            None => {
                let mut body = Attributes::new();
                if let Some(alias) = &lag.alias {
                    body.insert("alias".to_string(), Value::from(alias.as_str()));
                }
                drop_same_alias(&mut body, existing.and_then(|e| e.alias.as_deref()));
                patch.lag(&lag.name).body.extend(body);

                let ids = lag
                    .members
                    .iter()
                    .map(|m| state.member_id(lag, m))
                    .collect::<reconcile::Result<Vec<_>>>()?;
                patch.lag_interface(&lag.name, "interfaceMemberIds", member_ids_value(ids));
                if lag.lacp_mode.is_some() || lag.lacp_timer.is_some() {
                    patch.lag_interface(
                        &lag.name,
                        "lacpConfig",
                        json!({ "mode": lag.lacp_mode, "timer": lag.lacp_timer }),
                    );
                }
                log::debug!(
                    "{}: {} LAG '{}'",
                    device.target,
                    if existing.is_some() { "updating" } else { "creating" },
                    lag.name
                );
            }
            Some(vlan) => {
                let mut body = record.attributes.clone();
                let existing_alias = existing
                    .and_then(|e| e.subinterfaces.get(vlan))
                    .and_then(|s| s.get("alias"))
                    .and_then(Value::as_str);
                drop_same_alias(&mut body, existing_alias);
                patch
                    .lag(&lag.name)
                    .subinterfaces
                    .insert(vlan.clone(), json!({ "interface": body }));
            }
        }
    }

    Ok(work_combined(&device.target, &result, device.patch(patch.into_value())))
}

/// Add (`Mode::Create`) or remove (`Mode::Delete`) members; only the delta
/// is reported, the pushed membership is the resulting full list
fn change_members(
    device: &Device<'_>,
    lags: &[LagIntent],
    state: &DeviceLags,
    mode: Mode,
) -> reconcile::Result<TargetWork<PortalRequest>> {
    let (change, verb) = match mode {
        Mode::Create => (ChangeKind::Attached, "add"),
        Mode::Delete => (ChangeKind::Detached, "remove"),
    };
    let mut work = TargetWork::new(device.target.clone());
    let mut patch = LagsPatch::default();
    let mut objects = Vec::new();

    for lag in lags {
        if lag.members.is_empty() {
            log::warn!(
                "{}: no 'lagMembers' for LAG '{}', nothing to {verb}",
                device.target,
                lag.name
            );
            continue;
        }
        let Some(existing) = state.lags.get(&lag.name) else {
            log::warn!(
                "{}: LAG '{}' does not exist, cannot {verb} members",
                device.target,
                lag.name
            );
            work.skipped.extend(lag.members.iter().map(|m| lag.member_name(m)));
            continue;
        };

        let intent: Vec<IntentRecord> = lag
            .members
            .iter()
            .map(|m| IntentRecord::named(lag.member_name(m)))
            .collect();
        let snapshot: Vec<Summary> = state
            .member_names(existing)
            .iter()
            .map(|m| Summary::new(lag.member_name(m)))
            .collect();
        let free = never_in_use::<Summary>;
        let result = partition(&intent, &snapshot, free, mode, &Normalizer::new());
        work.absorb(&result);
        if result.is_empty() {
            continue;
        }

        let mut ids = existing.member_ids.clone();
        for member in &lag.members {
            if !result.apply_names().contains(&lag.member_name(member).as_str()) {
                continue;
            }
            let id = state.member_id(lag, member)?;
            match mode {
                Mode::Create => ids.insert(id),
                Mode::Delete => ids.remove(&id),
            };
        }
        patch.lag_interface(&lag.name, "interfaceMemberIds", member_ids_value(ids));
        objects.extend(
            result
                .to_apply
                .iter()
                .map(|action| PatchObject::new(action.name(), change)),
        );
    }

    work.push(Patch::new(device.patch(patch.into_value())).with_objects(objects));
    Ok(work)
}

/// Push LACP mode/timer where they differ (case-insensitive)
fn update_lacp(
    device: &Device<'_>,
    lags: &[LagIntent],
    state: &DeviceLags,
) -> TargetWork<PortalRequest> {
    let mut intent = Vec::new();
    let mut absent = Partition::default();

    for lag in lags {
        if lag.lacp_mode.is_none() && lag.lacp_timer.is_none() {
            log::warn!("{}: no lacpMode/lacpTimer for LAG '{}', skipping", device.target, lag.name);
            continue;
        }
        if !state.lags.contains_key(&lag.name) {
            log::warn!("{}: LAG '{}' does not exist, skipping", device.target, lag.name);
            absent.skipped.push(lag.name.clone());
            continue;
        }
        let mut attributes = Attributes::new();
        for (key, value) in [("lacpMode", &lag.lacp_mode), ("lacpTimer", &lag.lacp_timer)] {
            if let Some(value) = value {
                attributes.insert(key.to_string(), Value::from(value.as_str()));
            }
        }
        intent.push(IntentRecord::new(&lag.name, attributes));
    }

    let free = never_in_use::<Summary>;
    let result = merge_partitions([
        absent,
        partition(&intent, &state.lag_summaries(), free, Mode::Create, &Normalizer::new()),
    ]);

    let mut patch = LagsPatch::default();
    for action in &result.to_apply {
        let Some(existing) = state.lags.get(action.name()) else {
            continue;
        };
        let Some(lag) = lags.iter().find(|l| l.name == action.name()) else {
            continue;
        };
        let mode = lag.lacp_mode.clone().or_else(|| existing.lacp_mode.clone());
        let timer = lag.lacp_timer.clone().or_else(|| existing.lacp_timer.clone());
        patch.lag_interface(&lag.name, "lacpConfig", json!({ "mode": mode, "timer": timer }));
    }
    work_combined(&device.target, &result, device.patch(patch.into_value()))
}

/// Delete the listed subinterfaces that exist
fn delete_subinterfaces(
    device: &Device<'_>,
    lags: &[LagIntent],
    state: &DeviceLags,
) -> TargetWork<PortalRequest> {
    let intent: Vec<IntentRecord> = lags
        .iter()
        .flat_map(|lag| {
            lag.subinterfaces
                .iter()
                .map(|(vlan, _)| IntentRecord::named(lag.sub_name(vlan)))
        })
        .collect();
    subinterface_deletes(device, lags, state, &intent)
}

fn subinterface_deletes(
    device: &Device<'_>,
    lags: &[LagIntent],
    state: &DeviceLags,
    intent: &[IntentRecord],
) -> TargetWork<PortalRequest> {
    let free = never_in_use::<Summary>;
    let result = partition(intent, &state.sub_summaries(), free, Mode::Delete, &Normalizer::new());

    let mut patch = LagsPatch::default();
    for action in &result.to_apply {
        let Some((lag, vlan)) = lags.iter().find_map(|lag| {
            action
                .name()
                .strip_prefix(&lag.name)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|vlan| (lag, vlan))
        }) else {
            continue;
        };
        patch
            .lag(&lag.name)
            .subinterfaces
            .insert(vlan.to_string(), json!({ "interface": null }));
    }
    work_combined(&device.target, &result, device.patch(patch.into_value()))
}

/// Phase 1 deletes every existing subinterface of the listed LAGs, phase 2
/// deletes the LAGs themselves
fn deconfigure(
    device: &Device<'_>,
    lags: &[LagIntent],
    state: &DeviceLags,
) -> Vec<TargetWork<PortalRequest>> {
    let intent: Vec<IntentRecord> = lags
        .iter()
        .filter_map(|lag| state.lags.get(&lag.name).map(|existing| (lag, existing)))
        .flat_map(|(lag, existing)| {
            existing
                .subinterfaces
                .keys()
                .map(|vlan| IntentRecord::named(lag.sub_name(vlan)))
        })
        .collect();
    let subinterfaces = subinterface_deletes(device, lags, state, &intent);

    let records: Vec<IntentRecord> =
        lags.iter().map(|lag| IntentRecord::named(&lag.name)).collect();
    let free = never_in_use::<Summary>;
    let snapshot = state.lag_summaries();
    let result = partition(&records, &snapshot, free, Mode::Delete, &Normalizer::new());
    let mut patch = LagsPatch::default();
    for action in result.to_apply.iter().filter(|a| matches!(a, Action::Delete(_))) {
        patch.lag(action.name()).deleted = true;
    }
    let lags_work = work_combined(&device.target, &result, device.patch(patch.into_value()));

    vec![subinterfaces, lags_work]
}
