//! VRRP groups on interfaces and VLAN subinterfaces (`vrrp_config`)
//!
//! Objects are named `interface` or `interface.vlan`. Each carries an IPv4
//! and/or IPv6 group, pushed as `ipv4.vrrpGroup` / `ipv6.vrrpGroup`.

use super::{
    Device, ObjectKind, Operation, PlanContext, device_entries, device_sections, find_named,
    list_field, merge_partitions, plan_devices, section, single, unsupported,
};
use crate::pusher::PortalRequest;
use reconcile::{
    Attributes, Error, IntentRecord, Mode, Normalizer, Partition, Phase, Plan, Planner, Summary,
    TargetWork, never_in_use, partition, work_combined,
};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};

const SECTION: &str = "vrrp_config";

/// `(document key, device key)` per address family
const FAMILIES: [(&str, &str); 2] = [("vrrp_ipv4", "ipv4"), ("vrrp_ipv6", "ipv6")];

pub struct Vrrp<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> Vrrp<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }
}

impl Planner for Vrrp<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let operation = self.operation;
        if !ObjectKind::Vrrp.supports(operation) {
            return Err(unsupported(ObjectKind::Vrrp, operation));
        }
        let sections =
            device_sections(section(document, &[SECTION]).unwrap_or(&Value::Null), SECTION)?;
        let devices = sections
            .into_iter()
            .map(|(name, config)| {
                let entries = device_entries(&config, "interfaces")?;
                for entry in &entries {
                    VrrpIntent::parse(entry)?;
                }
                Ok((name, Value::Array(entries)))
            })
            .collect::<reconcile::Result<Vec<_>>>()?;

        plan_devices(
            &self.ctx,
            devices,
            vec![Phase::new(operation.to_string())],
            |device| Ok(vec![plan_device(device, operation)?]),
        )
    }
}

/// One interface (or subinterface) entry from the document
struct VrrpIntent {
    interface: String,
    vlan: Option<String>,
    /// device family key -> group config
    groups: BTreeMap<&'static str, Attributes>,
}

impl VrrpIntent {
    fn parse(entry: &Value) -> reconcile::Result<Self> {
        let interface = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::load("VRRP entry is missing the interface 'name'"))?;
        let vlan = match entry.get("vlan") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(_) => {
                return Err(Error::load(format!("VRRP entry '{interface}': invalid 'vlan'")));
            }
        };
        let mut groups = BTreeMap::new();
        for (key, family) in FAMILIES {
            match entry.get(key) {
                None | Some(Value::Null) => {}
                Some(Value::Object(config)) => {
                    groups.insert(family, config.clone());
                }
                Some(_) => {
                    return Err(Error::load(format!(
                        "VRRP entry '{interface}': '{key}' must be a map"
                    )));
                }
            }
        }
        Ok(Self {
            interface: interface.to_string(),
            vlan,
            groups,
        })
    }

    fn name(&self) -> String {
        match &self.vlan {
            Some(vlan) => format!("{}.{vlan}", self.interface),
            None => self.interface.clone(),
        }
    }
}

/// The interface or subinterface object the device reports
fn existing_interface<'v>(info: &'v Value, intent: &VrrpIntent) -> Option<&'v Value> {
    let interface = find_named(list_field(info, &["interfaces"]), &intent.interface)?;
    match &intent.vlan {
        None => Some(interface),
        Some(vlan) => list_field(interface, &["subinterfaces", "sub_interfaces"])
            .iter()
            .find(|sub| match sub.get("vlan") {
                Some(Value::Number(n)) => n.to_string() == *vlan,
                Some(Value::String(s)) => s.trim() == vlan,
                _ => false,
            }),
    }
}

/// Existing groups per family
fn existing_groups(interface: &Value) -> Map<String, Value> {
    FAMILIES
        .iter()
        .filter_map(|(_, family)| {
            let group = ["vrrpGroup", "vrrp_group", "vrrp"]
                .iter()
                .find_map(|key| interface.get(*family)?.get(*key))
                .filter(|g| g.is_object())?;
            Some(((*family).to_string(), group.clone()))
        })
        .collect()
}

fn plan_device(
    device: &Device<'_>,
    operation: Operation,
) -> reconcile::Result<TargetWork<PortalRequest>> {
    let entries = device.config.as_array().map(Vec::as_slice).unwrap_or_default();
    let mut intent = Vec::new();
    let mut snapshot = Vec::new();
    let mut absent = Partition::default();
    let mut locations: HashMap<String, (String, Option<String>)> = HashMap::new();

    for entry in entries {
        let vrrp = VrrpIntent::parse(entry)?;
        let name = vrrp.name();
        let existing = existing_interface(device.info, &vrrp).map(existing_groups);
        if let Some(groups) = &existing {
            snapshot.push(Summary::new(&name).with_raw(Value::Object(groups.clone())));
        }

        let attributes: Attributes = match operation {
            Operation::Configure => vrrp
                .groups
                .iter()
                .map(|(family, config)| ((*family).to_string(), Value::Object(config.clone())))
                .collect(),
            Operation::Enable => {
                let groups = existing.clone().unwrap_or_default();
                for family in vrrp.groups.keys() {
                    if !groups.contains_key(*family) {
                        return Err(Error::Resolution {
                            kind: format!("{family} VRRP group"),
                            name: format!("{name} on {}", device.target.name),
                        });
                    }
                }
                vrrp.groups
                    .keys()
                    .map(|family| ((*family).to_string(), json!({ "enabled": true })))
                    .collect()
            }
            _ => {
                // Deconfigure disables the listed families, or every group present
                let groups = existing.clone().unwrap_or_default();
                let families: Vec<&str> = if vrrp.groups.is_empty() {
                    groups.keys().map(String::as_str).collect()
                } else {
                    vrrp.groups.keys().copied().filter(|f| groups.contains_key(*f)).collect()
                };
                families
                    .into_iter()
                    .map(|family| (family.to_string(), json!({ "enabled": false })))
                    .collect()
            }
        };

        if attributes.is_empty() {
            log::info!("{}: no VRRP group to change on {name}, skipping", device.target);
            absent.skipped.push(name);
            continue;
        }
        locations.insert(name.clone(), (vrrp.interface.clone(), vrrp.vlan.clone()));
        intent.push(IntentRecord::new(name, attributes));
    }

    let free = never_in_use::<Summary>;
    let result = partition(&intent, &snapshot, free, Mode::Create, &Normalizer::new());
    let mut interfaces = Map::new();
    for action in &result.to_apply {
        let location = locations.get(action.name());
        let (Some(record), Some((interface, vlan))) = (action.record(), location) else {
            continue;
        };
        let body: Map<String, Value> = record
            .attributes
            .iter()
            .map(|(family, group)| (family.clone(), json!({ "vrrpGroup": group })))
            .collect();
        let entry = interfaces
            .entry(interface.clone())
            .or_insert_with(|| json!({ "interface": {} }));
        let Some(target) = entry.get_mut("interface").and_then(Value::as_object_mut) else {
            continue;
        };
        match vlan {
            None => target.extend(body),
            Some(vlan) => {
                let subs = target
                    .entry("subinterfaces")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(subs) = subs {
                    subs.insert(vlan.clone(), json!({ "interface": body }));
                }
            }
        }
    }

    let document = device.patch(single("interfaces", Value::Object(interfaces)));
    Ok(work_combined(&device.target, &merge_partitions([absent, result]), document))
}
