//! Interfaces, subinterfaces and WAN circuits (`edge.interfaces`,
//! `edge.circuits`)
//!
//! Configure pushes whatever differs in one patch per device. Circuits are
//! only configured when an interface in the same document refers to them.
//!
//! Deconfigure runs in two phases. A circuit cannot be detached while it
//! still carries static routes, so `circuit-routes` removes those first and
//! `interfaces` then resets each main interface to the enterprise's default
//! LAN segment and deletes the listed subinterfaces.
//!
//! The narrower operations run the same phases over part of the document:
//! circuits alone, LAN interfaces alone (no circuit routes), or WAN
//! interfaces together with their circuits.

use super::{
    Device, ObjectKind, Operation, PlanContext, check_devices, device_entries, device_sections,
    list_field, merge_partitions, plan_devices, section, snapshot_error, unsupported,
};
use crate::pusher::PortalRequest;
use reconcile::{
    Action, Attributes, Error, IntentRecord, Mode, Normalizer, Partition, Phase, Plan, Planner,
    Summary, TargetWork, intent::value_kind, never_in_use, partition, work_combined,
};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const INTERFACES: &str = "interfaces";
const CIRCUITS: &str = "circuits";
const SUBINTERFACE_KEYS: [&str; 2] = ["subinterfaces", "sub_interfaces"];

pub const ROUTES_PHASE: &str = "circuit-routes";
pub const INTERFACES_PHASE: &str = "interfaces";

pub struct Interfaces<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> Interfaces<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }
}

/// Part of the interface document an operation covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    All,
    /// Circuits the listed interfaces use, no interfaces
    Circuits,
    /// Interfaces and subinterfaces that set `lan`
    Lan,
    /// Interfaces and subinterfaces that set `circuit`, with those circuits
    Wan,
}

impl Scope {
    fn of(operation: Operation) -> Option<(Self, Mode)> {
        use Operation as Op;
        Some(match operation {
            Op::Configure => (Self::All, Mode::Create),
            Op::Deconfigure => (Self::All, Mode::Delete),
            Op::ConfigureCircuits => (Self::Circuits, Mode::Create),
            Op::DeconfigureCircuits => (Self::Circuits, Mode::Delete),
            Op::ConfigureLanInterfaces => (Self::Lan, Mode::Create),
            Op::DeconfigureLanInterfaces => (Self::Lan, Mode::Delete),
            Op::ConfigureWanCircuitsInterfaces => (Self::Wan, Mode::Create),
            Op::DeconfigureWanCircuitsInterfaces => (Self::Wan, Mode::Delete),
            _ => return None,
        })
    }

    fn touches_interfaces(self) -> bool {
        self != Self::Circuits
    }

    fn touches_circuits(self) -> bool {
        self != Self::Lan
    }
}

impl Planner for Interfaces<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let (scope, mode) = Scope::of(self.operation)
            .ok_or_else(|| unsupported(ObjectKind::Interfaces, self.operation))?;
        let devices = collect_devices(document, scope)?;
        if mode == Mode::Create {
            return plan_devices(
                &self.ctx,
                devices,
                vec![Phase::new(self.operation.to_string())],
                |device| Ok(vec![configure(device, scope)?]),
            );
        }

        let default_lan = if devices.is_empty() || !scope.touches_interfaces() {
            String::new()
        } else {
            default_lan(&self.ctx)?
        };
        let mut phases = Vec::new();
        if scope.touches_circuits() {
            phases.push(Phase::new(ROUTES_PHASE));
        }
        if scope.touches_interfaces() {
            phases.push(Phase::new(INTERFACES_PHASE));
        }
        plan_devices(&self.ctx, devices, phases, |device| {
            let mut works = Vec::new();
            if scope.touches_circuits() {
                works.push(remove_circuit_routes(device)?);
            }
            if scope.touches_interfaces() {
                works.push(reset_interfaces(device, &default_lan)?);
            }
            Ok(works)
        })
    }
}

/// LAN segment interfaces fall back to when deconfigured
fn default_lan(ctx: &PlanContext<'_>) -> reconcile::Result<String> {
    let enterprise = ctx
        .api
        .enterprise()
        .map_err(|e| snapshot_error("portal", &e))?;
    Ok(format!("default-{}", enterprise.enterprise_id))
}

/// Pair each device's interface list with its circuit list, cut down to
/// what `scope` covers. Every entry is checked before any remote call.
fn collect_devices(document: &Value, scope: Scope) -> reconcile::Result<Vec<(String, Value)>> {
    let interfaces = device_sections(
        section(document, &[INTERFACES]).unwrap_or(&Value::Null),
        INTERFACES,
    )?;
    let circuits = device_sections(
        section(document, &[CIRCUITS]).unwrap_or(&Value::Null),
        CIRCUITS,
    )?;

    for (name, _) in &circuits {
        if !interfaces.iter().any(|(n, _)| n == name) {
            log::warn!("{name}: circuits listed without interfaces, ignoring");
        }
    }

    let devices = interfaces
        .into_iter()
        .map(|(name, config)| {
            let device_circuits = match circuits.iter().find(|(n, _)| *n == name) {
                Some((_, config)) => device_entries(config, CIRCUITS)?,
                None => Vec::new(),
            };
            let merged = json!({
                "interfaces": device_entries(&config, INTERFACES)?,
                "circuits": device_circuits,
            });
            Ok((name, merged))
        })
        .collect::<reconcile::Result<Vec<_>>>()?;
    check_devices(&devices, check_entries)?;

    Ok(devices
        .into_iter()
        .map(|(name, config)| (name, restrict(&config, scope)))
        .collect())
}

/// Interface, subinterface and circuit entries all carry their keys
fn check_entries(config: &Value) -> reconcile::Result<()> {
    for entry in list_field(config, &[INTERFACES]) {
        let name = interface_name(entry)?;
        for sub in subinterfaces(entry) {
            subinterface_vlan(name, sub)?;
        }
    }
    for entry in list_field(config, &[CIRCUITS]) {
        circuit_name(entry).ok_or_else(|| Error::load("circuit entry is missing 'circuit'"))?;
        circuit_route_configs(entry)?;
    }
    Ok(())
}

/// A device's merged config with only the entries `scope` covers
fn restrict(config: &Value, scope: Scope) -> Value {
    let interfaces = list_field(config, &[INTERFACES]);
    let circuits = list_field(config, &[CIRCUITS]);
    let (interfaces, circuits) = match scope {
        Scope::All | Scope::Circuits => (interfaces.to_vec(), circuits.to_vec()),
        Scope::Lan => (setting(interfaces, "lan"), Vec::new()),
        Scope::Wan => (setting(interfaces, "circuit"), circuits.to_vec()),
    };
    json!({ "interfaces": interfaces, "circuits": circuits })
}

/// Interface entries cut down to the parts that set `key`: the main interface
/// when it sets it, and the subinterfaces that do
fn setting(interfaces: &[Value], key: &str) -> Vec<Value> {
    let sets = |value: &Value| value.get(key).is_some_and(|v| !v.is_null());
    interfaces
        .iter()
        .filter_map(|entry| {
            let subs: Vec<Value> = subinterfaces(entry)
                .iter()
                .filter(|sub| sets(*sub))
                .cloned()
                .collect();
            let mut kept = if sets(entry) {
                without(entry, &SUBINTERFACE_KEYS)
            } else if subs.is_empty() {
                log::debug!("interface {:?} does not set '{key}', skipping", entry.get("name"));
                return None;
            } else {
                let mut parent = Attributes::new();
                if let Some(name) = entry.get("name") {
                    parent.insert("name".to_string(), name.clone());
                }
                parent
            };
            if !subs.is_empty() {
                kept.insert("subinterfaces".to_string(), Value::Array(subs));
            }
            Some(Value::Object(kept))
        })
        .collect()
}

fn normalizer() -> Normalizer {
    Normalizer::new()
        .alias("lanSegment", "lan")
        .alias("lan_segment", "lan")
        .alias("wanCircuit", "circuit")
        .alias("wan_circuit", "circuit")
}

/// Where a planned object lands in the `edge` patch
enum Slot {
    Interface(String),
    Subinterface { interface: String, vlan: String },
    Circuit(String),
    CircuitRoute { circuit: String, prefix: String },
}

#[derive(Default)]
struct InterfacePatch {
    body: Attributes,
    subinterfaces: Map<String, Value>,
}

#[derive(Default)]
struct CircuitPatch {
    body: Attributes,
    routes: Map<String, Value>,
}

/// Accumulates the `edge` document for one device
#[derive(Default)]
struct EdgePatch {
    interfaces: BTreeMap<String, InterfacePatch>,
    circuits: BTreeMap<String, CircuitPatch>,
}

impl EdgePatch {
    fn add(&mut self, slot: &Slot, action: &Action, routes: &HashMap<String, Map<String, Value>>) {
        let Some(record) = action.record() else {
            return;
        };
        let deleting = matches!(action, Action::Delete(_));
        match slot {
            Slot::Interface(name) => {
                let entry = self.interfaces.entry(name.clone()).or_default();
                entry.body.extend(record.attributes.clone());
            }
            Slot::Subinterface { interface, vlan } => {
                let body = if deleting {
                    Value::Null
                } else {
                    Value::Object(record.attributes.clone())
                };
                self.interfaces
                    .entry(interface.clone())
                    .or_default()
                    .subinterfaces
                    .insert(vlan.clone(), json!({ "interface": body }));
            }
            Slot::Circuit(name) => {
                let entry = self.circuits.entry(name.clone()).or_default();
                let mut body = record.attributes.clone();
                body.remove("staticRoutes");
                entry.body.extend(body);
                if let Some(configured) = routes.get(name) {
                    entry.routes.extend(configured.clone());
                }
            }
            Slot::CircuitRoute { circuit, prefix } => {
                let route = if deleting {
                    Value::Null
                } else {
                    Value::Object(record.attributes.clone())
                };
                self.circuits
                    .entry(circuit.clone())
                    .or_default()
                    .routes
                    .insert(prefix.clone(), json!({ "route": route }));
            }
        }
    }

    fn into_value(self) -> Value {
        let mut edge = Map::new();
        if !self.interfaces.is_empty() {
            let interfaces: Map<String, Value> = self
                .interfaces
                .into_iter()
                .map(|(name, patch)| {
                    let mut body = patch.body;
                    if !patch.subinterfaces.is_empty() {
                        body.insert(
                            "subinterfaces".to_string(),
                            Value::Object(patch.subinterfaces),
                        );
                    }
                    (name, json!({ "interface": body }))
                })
                .collect();
            edge.insert(INTERFACES.to_string(), Value::Object(interfaces));
        }
        if !self.circuits.is_empty() {
            let circuits: Map<String, Value> = self
                .circuits
                .into_iter()
                .map(|(name, patch)| {
                    let mut body = patch.body;
                    if !patch.routes.is_empty() {
                        body.insert("staticRoutes".to_string(), Value::Object(patch.routes));
                    }
                    (name, json!({ "circuit": body }))
                })
                .collect();
            edge.insert(CIRCUITS.to_string(), Value::Object(circuits));
        }
        Value::Object(edge)
    }
}

fn build_work(
    device: &Device<'_>,
    result: &Partition,
    slots: &HashMap<String, Slot>,
    routes: &HashMap<String, Map<String, Value>>,
) -> TargetWork<PortalRequest> {
    let mut patch = EdgePatch::default();
    for action in &result.to_apply {
        if let Some(slot) = slots.get(action.name()) {
            patch.add(slot, action, routes);
        }
    }
    work_combined(&device.target, result, device.patch(patch.into_value()))
}

fn interface_name(entry: &Value) -> reconcile::Result<&str> {
    entry
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::load("interface entry is missing 'name'"))
}

fn subinterfaces(entry: &Value) -> &[Value] {
    list_field(entry, &SUBINTERFACE_KEYS)
}

/// VLAN id as a map key; ids may be numbers or strings
fn vlan_key(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn subinterface_vlan(interface: &str, sub: &Value) -> reconcile::Result<String> {
    vlan_key(sub.get("vlan"))
        .ok_or_else(|| Error::load(format!("subinterface of '{interface}' is missing 'vlan'")))
}

/// Circuits the listed interfaces (and their subinterfaces) refer to
fn referenced_circuits(interfaces: &[Value]) -> BTreeSet<String> {
    interfaces
        .iter()
        .flat_map(|entry| std::iter::once(entry).chain(subinterfaces(entry)))
        .filter_map(|e| e.get("circuit").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn circuit_name(entry: &Value) -> Option<&str> {
    entry
        .get("circuit")
        .or_else(|| entry.get("name"))
        .and_then(Value::as_str)
}

fn without(entry: &Value, keys: &[&str]) -> Attributes {
    let mut attributes = entry.as_object().cloned().unwrap_or_default();
    for key in keys {
        attributes.remove(*key);
    }
    attributes
}

/// Static route configs on a circuit entry, as `(prefix, config)`
fn circuit_route_configs(entry: &Value) -> reconcile::Result<Vec<(String, Attributes)>> {
    let value = entry
        .get("static_routes")
        .or_else(|| entry.get("staticRoutes"))
        .unwrap_or(&Value::Null);
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(prefix, config)| {
                (prefix.clone(), config.as_object().cloned().unwrap_or_default())
            })
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(prefix) => Ok((prefix.clone(), Attributes::new())),
                Value::Object(map) => {
                    let prefix = map
                        .get("prefix")
                        .or_else(|| map.get("destinationPrefix"))
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::load("circuit static route is missing 'prefix'"))?;
                    Ok((prefix.to_string(), map.clone()))
                }
                other => Err(Error::load(format!(
                    "circuit static route must be a prefix or a map, got {}",
                    value_kind(other)
                ))),
            })
            .collect(),
        other => Err(Error::load(format!(
            "circuit 'static_routes' must be a list or a map, got {}",
            value_kind(other)
        ))),
    }
}

fn prefix_list(prefixes: impl IntoIterator<Item = String>) -> Value {
    let mut prefixes: Vec<String> = prefixes.into_iter().collect();
    prefixes.sort();
    prefixes.dedup();
    Value::Array(prefixes.into_iter().map(|p| json!({ "prefix": p })).collect())
}

// ============================================================================
// Device state
// ============================================================================

fn device_interfaces(info: &Value) -> &[Value] {
    list_field(info, &[INTERFACES])
}

fn existing_interface<'v>(info: &'v Value, name: &str) -> Option<&'v Value> {
    super::find_named(device_interfaces(info), name)
}

fn existing_circuit<'v>(info: &'v Value, name: &str) -> Option<&'v Value> {
    list_field(info, &[CIRCUITS])
        .iter()
        .find(|c| circuit_name(c) == Some(name))
}

/// Prefixes of the static routes a circuit carries
fn existing_circuit_prefixes(circuit: &Value) -> Vec<String> {
    list_field(circuit, &["staticRoutes", "static_routes"])
        .iter()
        .filter_map(|route| {
            route
                .get("prefix")
                .or_else(|| route.get("destinationPrefix"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

/// Main interfaces and subinterfaces (`iface.vlan`)
fn interface_summaries(info: &Value) -> (Vec<Summary>, Vec<Summary>) {
    let mut mains = Vec::new();
    let mut subs = Vec::new();
    for interface in device_interfaces(info) {
        let Some(name) = interface.get("name").and_then(Value::as_str) else {
            continue;
        };
        let raw = without(interface, &["name", SUBINTERFACE_KEYS[0], SUBINTERFACE_KEYS[1]]);
        mains.push(Summary::new(name).with_raw(Value::Object(raw)));
        for sub in subinterfaces(interface) {
            if let Some(vlan) = vlan_key(sub.get("vlan")) {
                let raw = without(sub, &["vlan"]);
                subs.push(Summary::new(format!("{name}.{vlan}")).with_raw(Value::Object(raw)));
            }
        }
    }
    (mains, subs)
}

fn circuit_summaries(info: &Value) -> Vec<Summary> {
    list_field(info, &[CIRCUITS])
        .iter()
        .filter_map(|circuit| {
            let name = circuit_name(circuit)?;
            let mut raw = without(circuit, &["name", "circuit", "staticRoutes", "static_routes"]);
            raw.insert(
                "staticRoutes".to_string(),
                prefix_list(existing_circuit_prefixes(circuit)),
            );
            Some(Summary::new(name).with_raw(Value::Object(raw)))
        })
        .collect()
}

// ============================================================================
// Configure
// ============================================================================

fn configure(device: &Device<'_>, scope: Scope) -> reconcile::Result<TargetWork<PortalRequest>> {
    let interfaces = list_field(device.config, &[INTERFACES]);
    let mut slots = HashMap::new();
    let mut mains = Vec::new();
    let mut subs = Vec::new();

    let listed: &[Value] = if scope.touches_interfaces() {
        interfaces
    } else {
        &[]
    };
    for entry in listed {
        let name = interface_name(entry)?;
        let attributes = without(entry, &["name", SUBINTERFACE_KEYS[0], SUBINTERFACE_KEYS[1]]);
        if !attributes.is_empty() {
            slots.insert(name.to_string(), Slot::Interface(name.to_string()));
            mains.push(IntentRecord::new(name, attributes));
        }
        for sub in subinterfaces(entry) {
            let vlan = subinterface_vlan(name, sub)?;
            let record_name = format!("{name}.{vlan}");
            slots.insert(
                record_name.clone(),
                Slot::Subinterface {
                    interface: name.to_string(),
                    vlan,
                },
            );
            subs.push(IntentRecord::new(record_name, without(sub, &["vlan"])));
        }
    }

    let referenced = referenced_circuits(interfaces);
    let mut circuits = Vec::new();
    let mut routes: HashMap<String, Map<String, Value>> = HashMap::new();
    for entry in list_field(device.config, &[CIRCUITS]) {
        let name = circuit_name(entry)
            .ok_or_else(|| Error::load("circuit entry is missing 'circuit'"))?;
        if !referenced.contains(name) {
            log::info!(
                "{}: circuit '{name}' not used by any listed interface, skipping",
                device.target
            );
            continue;
        }
        let configs = circuit_route_configs(entry)?;
        let mut attributes =
            without(entry, &["name", "circuit", "static_routes", "staticRoutes"]);
        if !configs.is_empty() {
            attributes.insert(
                "staticRoutes".to_string(),
                prefix_list(configs.iter().map(|(p, _)| p.clone())),
            );
            let payload = configs
                .into_iter()
                .map(|(prefix, mut config)| {
                    config.remove("prefix");
                    config.insert("destinationPrefix".to_string(), Value::from(prefix.as_str()));
                    (prefix, json!({ "route": config }))
                })
                .collect();
            routes.insert(name.to_string(), payload);
        }
        slots.insert(name.to_string(), Slot::Circuit(name.to_string()));
        circuits.push(IntentRecord::new(name, attributes));
    }

    let (main_state, sub_state) = interface_summaries(device.info);
    let circuit_state = circuit_summaries(device.info);
    let normalizer = normalizer();
    let free = never_in_use::<Summary>;
    let result = merge_partitions([
        partition(&circuits, &circuit_state, free, Mode::Create, &normalizer),
        partition(&mains, &main_state, free, Mode::Create, &normalizer),
        partition(&subs, &sub_state, free, Mode::Create, &normalizer),
    ]);
    Ok(build_work(device, &result, &slots, &routes))
}

// ============================================================================
// Deconfigure
// ============================================================================

/// Phase 1: delete static routes on the circuits the listed interfaces use.
///
/// Routes listed for a circuit in the document are removed; a circuit listed
/// without routes (or not listed at all) loses every route it carries.
fn remove_circuit_routes(device: &Device<'_>) -> reconcile::Result<TargetWork<PortalRequest>> {
    let listed = list_field(device.config, &[CIRCUITS]);
    let mut slots = HashMap::new();
    let mut intent = Vec::new();
    let mut snapshot = Vec::new();

    for circuit in referenced_circuits(list_field(device.config, &[INTERFACES])) {
        let existing = existing_circuit(device.info, &circuit)
            .map(existing_circuit_prefixes)
            .unwrap_or_default();
        let entry = listed
            .iter()
            .find(|c| circuit_name(c) == Some(circuit.as_str()));
        let requested: Vec<String> = match entry {
            Some(entry) => circuit_route_configs(entry)?
                .into_iter()
                .map(|(prefix, _)| prefix)
                .collect(),
            None => Vec::new(),
        };
        let prefixes = if requested.is_empty() {
            existing.clone()
        } else {
            requested
        };

        for prefix in prefixes {
            let name = format!("{circuit}/{prefix}");
            slots.insert(
                name.clone(),
                Slot::CircuitRoute {
                    circuit: circuit.clone(),
                    prefix,
                },
            );
            intent.push(IntentRecord::named(name));
        }
        snapshot.extend(
            existing
                .iter()
                .map(|prefix| Summary::new(format!("{circuit}/{prefix}"))),
        );
    }

    let free = never_in_use::<Summary>;
    let result = partition(&intent, &snapshot, free, Mode::Delete, &normalizer());
    Ok(build_work(device, &result, &slots, &HashMap::new()))
}

/// Phase 2: reset main interfaces to the default LAN and delete the listed
/// subinterfaces. Interfaces and subinterfaces the device lacks are skipped.
fn reset_interfaces(
    device: &Device<'_>,
    default_lan: &str,
) -> reconcile::Result<TargetWork<PortalRequest>> {
    let mut slots = HashMap::new();
    let mut absent = Partition::default();
    let mut mains = Vec::new();
    let mut subs = Vec::new();

    for entry in list_field(device.config, &[INTERFACES]) {
        let name = interface_name(entry)?;
        let parent_requested = ["lan", "circuit"]
            .iter()
            .any(|key| entry.get(*key).is_some_and(|v| !v.is_null()));

        if parent_requested {
            if existing_interface(device.info, name).is_some() {
                let mut reset = Attributes::new();
                reset.insert("lan".to_string(), Value::from(default_lan));
                reset.insert("circuit".to_string(), Value::Null);
                slots.insert(name.to_string(), Slot::Interface(name.to_string()));
                mains.push(IntentRecord::new(name, reset));
            } else {
                log::info!("{}: interface '{name}' does not exist, skipping", device.target);
                absent.skipped.push(name.to_string());
            }
        }

        for sub in subinterfaces(entry) {
            let vlan = subinterface_vlan(name, sub)?;
            let record_name = format!("{name}.{vlan}");
            slots.insert(
                record_name.clone(),
                Slot::Subinterface {
                    interface: name.to_string(),
                    vlan,
                },
            );
            subs.push(IntentRecord::named(record_name));
        }
    }

    let (main_state, sub_state) = interface_summaries(device.info);
    let normalizer = normalizer();
    let result = merge_partitions([
        absent,
        partition(&mains, &main_state, never_in_use::<Summary>, Mode::Create, &normalizer),
        partition(&subs, &sub_state, never_in_use::<Summary>, Mode::Delete, &normalizer),
    ]);
    Ok(build_work(device, &result, &slots, &HashMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::testing::portal_with_devices;
    use crate::pusher::PortalPusher;
    use portal::endpoints;
    use reconcile::{ExecuteOptions, execute_simple};

    fn device_info() -> Value {
        json!({
            "interfaces": [
                {
                    "name": "GigabitEthernet1/0/0",
                    "lan": "lan-a",
                    "subinterfaces": [{"vlan": 100, "lan": "lan-b"}]
                },
                {"name": "GigabitEthernet2/0/0", "lan": "default-42", "circuit": "isp-1"},
                {"name": "GigabitEthernet3/0/0", "lan": "default-42"}
            ],
            "circuits": [{
                "name": "isp-1",
                "staticRoutes": [{"prefix": "0.0.0.0/0"}, {"prefix": "10.0.0.0/8"}]
            }]
        })
    }

    fn planner(mock: &portal::MockPortal, operation: Operation) -> Interfaces<'_> {
        Interfaces::new(PlanContext::new(mock, 1), operation)
    }

    fn body(plan: &Plan<PortalRequest>, phase: usize) -> Value {
        match &plan.phases[phase].work[0].patches[0].document {
            PortalRequest::DeviceConfig { body, .. } => body.clone(),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_configure_pushes_differences() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let document = json!({
            "interfaces": [{"edge-1": [
                {
                    "name": "GigabitEthernet1/0/0",
                    "lan": "lan-a",
                    "subinterfaces": [{"vlan": 100, "lan": "lan-b"}, {"vlan": 200, "lan": "lan-c"}]
                },
                {"name": "GigabitEthernet4/0/0", "circuit": "isp-2"}
            ]}],
            "circuits": [{"edge-1": [
                {"circuit": "isp-2", "label": "internet", "static_routes": {"0.0.0.0/0": {}}},
                {"circuit": "unused", "label": "mpls"}
            ]}]
        });

        let plan = planner(&mock, Operation::Configure).plan(&document).unwrap();

        let work = &plan.phases[0].work[0];
        assert_eq!(
            work.unchanged,
            vec!["GigabitEthernet1/0/0", "GigabitEthernet1/0/0.100"]
        );
        assert_eq!(
            work.patches[0].names(),
            vec!["isp-2", "GigabitEthernet4/0/0", "GigabitEthernet1/0/0.200"]
        );
        assert_eq!(
            body(&plan, 0),
            json!({"edge": {
                "interfaces": {
                    "GigabitEthernet1/0/0": {"interface": {
                        "subinterfaces": {"200": {"interface": {"lan": "lan-c"}}}
                    }},
                    "GigabitEthernet4/0/0": {"interface": {"circuit": "isp-2"}}
                },
                "circuits": {
                    "isp-2": {"circuit": {
                        "label": "internet",
                        "staticRoutes": {"0.0.0.0/0": {"route": {"destinationPrefix": "0.0.0.0/0"}}}
                    }}
                }
            }})
        );
    }

    #[test]
    fn test_deconfigure_removes_routes_before_reset() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let document = json!({
            "interfaces": [{"edge-1": [
                {"name": "GigabitEthernet2/0/0", "circuit": "isp-1"},
                {
                    "name": "GigabitEthernet1/0/0",
                    "lan": "lan-a",
                    "subinterfaces": [{"vlan": 100}, {"vlan": 300}]
                },
                {"name": "GigabitEthernet9/0/0", "lan": "lan-z"}
            ]}]
        });

        let plan = planner(&mock, Operation::Deconfigure).plan(&document).unwrap();
        assert_eq!(plan.phases[0].name, ROUTES_PHASE);
        assert_eq!(plan.phases[1].name, INTERFACES_PHASE);

        let report =
            execute_simple(plan, &ExecuteOptions::default(), &PortalPusher::new(&mock)).unwrap();
        assert_eq!(
            report.outcome.deleted,
            vec!["isp-1/0.0.0.0/0", "isp-1/10.0.0.0/8", "GigabitEthernet1/0/0.100"]
        );
        assert_eq!(
            report.outcome.updated,
            vec!["GigabitEthernet2/0/0", "GigabitEthernet1/0/0"]
        );
        assert_eq!(
            report.outcome.skipped,
            vec!["GigabitEthernet9/0/0", "GigabitEthernet1/0/0.300"]
        );

        let sent = mock.requests_to(&endpoints::device_config(7));
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0].body,
            json!({"edge": {"circuits": {"isp-1": {"circuit": {"staticRoutes": {
                "0.0.0.0/0": {"route": null},
                "10.0.0.0/8": {"route": null}
            }}}}}})
        );
        assert_eq!(
            sent[1].body["edge"]["interfaces"]["GigabitEthernet2/0/0"],
            json!({"interface": {"lan": "default-42", "circuit": null}})
        );
        assert_eq!(
            sent[1].body["edge"]["interfaces"]["GigabitEthernet1/0/0"],
            json!({"interface": {
                "lan": "default-42",
                "circuit": null,
                "subinterfaces": {"100": {"interface": null}}
            }})
        );
    }

    #[test]
    fn test_deconfigure_interface_already_default() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let document = json!({
            "interfaces": [{"edge-1": [{"name": "GigabitEthernet3/0/0", "lan": "lan-a"}]}]
        });

        let plan = planner(&mock, Operation::Deconfigure).plan(&document).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.phases[1].work[0].unchanged, vec!["GigabitEthernet3/0/0"]);
    }

    #[test]
    fn test_listed_circuit_routes_limit_deletion() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let document = json!({
            "interfaces": [{"edge-1": [{"name": "GigabitEthernet2/0/0", "circuit": "isp-1"}]}],
            "circuits": [{"edge-1": [
                {"circuit": "isp-1", "static_routes": ["10.0.0.0/8", "172.16.0.0/12"]}
            ]}]
        });

        let plan = planner(&mock, Operation::Deconfigure).plan(&document).unwrap();
        let work = &plan.phases[0].work[0];
        assert_eq!(work.patches[0].names(), vec!["isp-1/10.0.0.0/8"]);
        assert_eq!(work.skipped, vec!["isp-1/172.16.0.0/12"]);
    }

    #[test]
    fn test_subinterface_without_vlan_fails_before_any_call() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let document = json!({
            "interfaces": [{"edge-1": [
                {"name": "GigabitEthernet1/0/0", "subinterfaces": [{"lan": "x"}]}
            ]}]
        });
        for operation in [Operation::Configure, Operation::Deconfigure] {
            let result = planner(&mock, operation).plan(&document);
            assert!(matches!(result, Err(Error::Load(_))));
        }
        assert!(mock.reads().is_empty());
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_bad_circuit_route_fails_before_any_call() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let document = json!({
            "interfaces": [{"edge-1": [{"name": "GigabitEthernet4/0/0", "circuit": "isp-2"}]}],
            "circuits": [{"edge-1": [{"circuit": "isp-2", "static_routes": [42]}]}]
        });
        let result = planner(&mock, Operation::ConfigureCircuits).plan(&document);
        assert!(matches!(result, Err(Error::Load(_))));
        assert!(mock.reads().is_empty());
    }

    fn mixed_document() -> Value {
        json!({
            "interfaces": [{"edge-1": [
                {
                    "name": "GigabitEthernet1/0/0",
                    "lan": "lan-a",
                    "subinterfaces": [{"vlan": 100, "lan": "lan-b"}, {"vlan": 200, "lan": "lan-c"}]
                },
                {
                    "name": "GigabitEthernet4/0/0",
                    "circuit": "isp-2",
                    "subinterfaces": [{"vlan": 10, "lan": "lan-d"}]
                }
            ]}],
            "circuits": [{"edge-1": [
                {"circuit": "isp-2", "label": "internet", "static_routes": {"0.0.0.0/0": {}}}
            ]}]
        })
    }

    #[test]
    fn test_configure_circuits_only() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let plan = planner(&mock, Operation::ConfigureCircuits)
            .plan(&mixed_document())
            .unwrap();

        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].work[0].patches[0].names(), vec!["isp-2"]);
        assert_eq!(
            body(&plan, 0),
            json!({"edge": {"circuits": {"isp-2": {"circuit": {
                "label": "internet",
                "staticRoutes": {"0.0.0.0/0": {"route": {"destinationPrefix": "0.0.0.0/0"}}}
            }}}}})
        );
    }

    #[test]
    fn test_deconfigure_circuits_only_removes_routes() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let document = json!({
            "interfaces": [{"edge-1": [
                {"name": "GigabitEthernet2/0/0", "circuit": "isp-1"},
                {"name": "GigabitEthernet1/0/0", "lan": "lan-a"}
            ]}]
        });

        let plan = planner(&mock, Operation::DeconfigureCircuits)
            .plan(&document)
            .unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].name, ROUTES_PHASE);

        let report =
            execute_simple(plan, &ExecuteOptions::default(), &PortalPusher::new(&mock)).unwrap();
        assert_eq!(
            report.outcome.deleted,
            vec!["isp-1/0.0.0.0/0", "isp-1/10.0.0.0/8"]
        );
        assert!(report.outcome.updated.is_empty());
        assert_eq!(mock.requests().len(), 1);
        assert!(!mock.reads().contains(&endpoints::ENTERPRISE.to_string()));
    }

    #[test]
    fn test_configure_lan_interfaces_only() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let plan = planner(&mock, Operation::ConfigureLanInterfaces)
            .plan(&mixed_document())
            .unwrap();

        let work = &plan.phases[0].work[0];
        assert_eq!(
            work.unchanged,
            vec!["GigabitEthernet1/0/0", "GigabitEthernet1/0/0.100"]
        );
        assert_eq!(
            work.patches[0].names(),
            vec!["GigabitEthernet1/0/0.200", "GigabitEthernet4/0/0.10"]
        );
        let edge = body(&plan, 0)["edge"].clone();
        assert!(edge.get("circuits").is_none());
        assert_eq!(
            edge["interfaces"]["GigabitEthernet4/0/0"],
            json!({"interface": {"subinterfaces": {"10": {"interface": {"lan": "lan-d"}}}}})
        );
    }

    #[test]
    fn test_deconfigure_lan_interfaces_leaves_wan_alone() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let document = json!({
            "interfaces": [{"edge-1": [
                {"name": "GigabitEthernet2/0/0", "circuit": "isp-1"},
                {
                    "name": "GigabitEthernet1/0/0",
                    "lan": "lan-a",
                    "subinterfaces": [{"vlan": 100, "lan": "lan-b"}]
                }
            ]}]
        });

        let plan = planner(&mock, Operation::DeconfigureLanInterfaces)
            .plan(&document)
            .unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].name, INTERFACES_PHASE);

        let report =
            execute_simple(plan, &ExecuteOptions::default(), &PortalPusher::new(&mock)).unwrap();
        assert_eq!(report.outcome.updated, vec!["GigabitEthernet1/0/0"]);
        assert_eq!(report.outcome.deleted, vec!["GigabitEthernet1/0/0.100"]);

        let sent = mock.requests_to(&endpoints::device_config(7));
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body["edge"].get("circuits").is_none());
        assert!(
            sent[0].body["edge"]["interfaces"]
                .get("GigabitEthernet2/0/0")
                .is_none()
        );
    }

    #[test]
    fn test_configure_wan_circuits_interfaces() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let plan = planner(&mock, Operation::ConfigureWanCircuitsInterfaces)
            .plan(&mixed_document())
            .unwrap();

        let work = &plan.phases[0].work[0];
        assert!(work.unchanged.is_empty());
        assert_eq!(work.patches[0].names(), vec!["isp-2", "GigabitEthernet4/0/0"]);
        assert_eq!(
            body(&plan, 0)["edge"]["interfaces"],
            json!({"GigabitEthernet4/0/0": {"interface": {"circuit": "isp-2"}}})
        );
    }

    #[test]
    fn test_deconfigure_wan_circuits_interfaces() {
        let mock = portal_with_devices(&[(7, "edge-1", device_info())]);
        let document = json!({
            "interfaces": [{"edge-1": [
                {"name": "GigabitEthernet2/0/0", "circuit": "isp-1"},
                {
                    "name": "GigabitEthernet1/0/0",
                    "lan": "lan-a",
                    "subinterfaces": [{"vlan": 100, "lan": "lan-b"}]
                }
            ]}]
        });

        let plan = planner(&mock, Operation::DeconfigureWanCircuitsInterfaces)
            .plan(&document)
            .unwrap();
        let report =
            execute_simple(plan, &ExecuteOptions::default(), &PortalPusher::new(&mock)).unwrap();
        assert_eq!(
            report.outcome.deleted,
            vec!["isp-1/0.0.0.0/0", "isp-1/10.0.0.0/8"]
        );
        assert_eq!(report.outcome.updated, vec!["GigabitEthernet2/0/0"]);
        assert_eq!(mock.requests_to(&endpoints::device_config(7)).len(), 2);
    }
}
