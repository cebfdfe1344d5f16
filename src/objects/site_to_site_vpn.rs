//! Site-to-site VPN tunnels (`edge.siteToSiteVpn`)
//!
//! The document lists `{device: [vpn, ...]}`; the device reports its tunnels
//! under `ipsecTunnels`. Secrets (`presharedKey`, `md5Password`) are never
//! read back, so they take no part in the comparison.

use super::{
    Device, ObjectKind, Operation, PlanContext, check_devices, device_entries, device_sections,
    plan_devices, section, single, unsupported,
};
use crate::pusher::PortalRequest;
use reconcile::{
    Action, IntentRecord, Mode, Normalizer, Phase, Plan, Planner, Summary, TargetWork,
    never_in_use, partition, work_combined,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

const SECTION: &str = "siteToSiteVpn";
const SECRETS: [&str; 2] = ["presharedKey", "md5Password"];

pub struct SiteToSiteVpn<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> SiteToSiteVpn<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }
}

impl Planner for SiteToSiteVpn<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let mode = match self.operation {
            Operation::Configure => Mode::Create,
            Operation::Deconfigure => Mode::Delete,
            other => return Err(unsupported(ObjectKind::SiteToSiteVpn, other)),
        };
        let devices = device_sections(
            section(document, &[SECTION, "site_to_site_vpn"]).unwrap_or(&Value::Null),
            SECTION,
        )?;
        if devices.is_empty() {
            log::info!("No '{SECTION}' section in document");
        }
        check_devices(&devices, tunnels)?;

        plan_devices(
            &self.ctx,
            devices,
            vec![Phase::new(self.operation.to_string())],
            |device| Ok(vec![plan_device(device, mode)?]),
        )
    }
}

fn normalizer() -> Normalizer {
    SECRETS
        .iter()
        .fold(Normalizer::new(), |n, key| n.ignore(key))
}

/// The device's tunnel entries as named records
fn tunnels(config: &Value) -> reconcile::Result<Vec<IntentRecord>> {
    device_entries(config, SECTION)?
        .iter()
        .map(|entry| IntentRecord::from_value(entry, "name"))
        .collect()
}

fn plan_device(device: &Device<'_>, mode: Mode) -> reconcile::Result<TargetWork<PortalRequest>> {
    let mut payloads: HashMap<String, Value> = HashMap::new();
    let mut intent = Vec::new();
    for record in tunnels(device.config)? {
        payloads.insert(record.name.clone(), api_config(&record));
        intent.push(IntentRecord::new(
            record.name.clone(),
            comparable(&record.attributes),
        ));
    }

    let snapshot = summaries(device.info);
    let result = partition(&intent, &snapshot, never_in_use::<Summary>, mode, &normalizer());

    let vpns: Map<String, Value> = result
        .to_apply
        .iter()
        .map(|action| {
            let config = match action {
                Action::Delete(_) => Value::Null,
                _ => payloads.get(action.name()).cloned().unwrap_or(Value::Null),
            };
            (action.name().to_string(), json!({ "siteToSiteVpn": config }))
        })
        .collect();
    let payload = single(SECTION, Value::Object(vpns));
    Ok(work_combined(&device.target, &result, device.patch(payload)))
}

/// Config as pushed: name included, BGP password and address families in
/// API shape
fn api_config(record: &IntentRecord) -> Value {
    let mut config = record.attributes.clone();
    config.insert("name".to_string(), Value::String(record.name.clone()));
    if let Some(bgp) = routing_bgp_mut(&mut config) {
        if let Some(Value::String(password)) = bgp.get("md5Password").cloned() {
            bgp.insert("md5Password".to_string(), json!({ "md5Password": password }));
        }
        if let Some(Value::Object(families)) = bgp.get_mut("addressFamilies") {
            for family in families.values_mut() {
                *family = api_family(family.take());
            }
        }
    }
    Value::Object(config)
}

fn routing_bgp_mut(config: &mut Map<String, Value>) -> Option<&mut Map<String, Value>> {
    let key = ["routing", "routingPolicy"]
        .into_iter()
        .find(|k| config.get(*k).is_some_and(Value::is_object))?;
    config
        .get_mut(key)?
        .get_mut("bgp")
        .and_then(Value::as_object_mut)
}

/// `{"family": {...}}` with policies as `{"policy": name}` and each policy
/// mirrored to its filter key
fn api_family(value: Value) -> Value {
    let Value::Object(mut outer) = value else {
        return value;
    };
    let wrapped = outer.contains_key("family");
    let mut family = if wrapped {
        match outer.remove("family") {
            Some(Value::Object(family)) => family,
            Some(other) => return json!({ "family": other }),
            None => Map::new(),
        }
    } else {
        outer
    };
    for (policy_key, filter_key) in [
        ("inboundPolicy", "inboundFilter"),
        ("outboundPolicy", "outboundFilter"),
    ] {
        if let Some(policy) = family.get(policy_key) {
            let policy = policy_field(policy);
            family.insert(filter_key.to_string(), policy.clone());
            family.insert(policy_key.to_string(), policy);
        }
    }
    json!({ "family": family })
}

fn policy_field(value: &Value) -> Value {
    match value {
        Value::String(name) => json!({ "policy": name }),
        Value::Object(map) => {
            json!({ "policy": map.get("policy").cloned().unwrap_or(Value::Null) })
        }
        _ => json!({ "policy": null }),
    }
}

/// Intended attributes in the shape the device reports: `routing.bgp` and
/// `routing.static` hoisted to the top level
fn comparable(attributes: &Map<String, Value>) -> Map<String, Value> {
    let mut out = attributes.clone();
    let routing = out
        .remove("routing")
        .or_else(|| out.remove("routingPolicy"));
    if let Some(Value::Object(routing)) = routing {
        for key in ["bgp", "static"] {
            if let Some(value) = routing.get(key)
                && !out.contains_key(key)
            {
                out.insert(key.to_string(), value.clone());
            }
        }
    }
    if let Some(Value::Object(bgp)) = out.get_mut("bgp")
        && let Some(Value::Object(families)) = bgp.get_mut("addressFamilies")
    {
        for family in families.values_mut() {
            *family = comparable_family(family.take());
        }
    }
    out
}

/// Policies only; the mirrored filters are derived on push
fn comparable_family(value: Value) -> Value {
    let mut family = api_family(value);
    if let Some(Value::Object(inner)) = family.get_mut("family") {
        inner.remove("inboundFilter");
        inner.remove("outboundFilter");
    }
    family
}

/// Tunnels reported under `ipsecTunnels` (list of named entries or a map
/// keyed by name)
fn summaries(info: &Value) -> Vec<Summary> {
    let tunnels = info
        .get("ipsecTunnels")
        .or_else(|| info.get("ipsec_tunnels"));
    let entries: Vec<(String, &Value)> = match tunnels {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|t| Some((t.get("name")?.as_str()?.to_string(), t)))
            .collect(),
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .map(|(name, tunnel)| Summary::new(name).with_raw(existing_attributes(tunnel)))
        .collect()
}

/// Address families come back as a list keyed by `addressFamily`
fn existing_attributes(tunnel: &Value) -> Value {
    let mut tunnel = tunnel.clone();
    if let Some(Value::Object(bgp)) = tunnel.get_mut("bgp")
        && let Some(families) = bgp.get_mut("addressFamilies")
    {
        let by_name: Map<String, Value> = match families.take() {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let name = item
                        .get("addressFamily")
                        .and_then(Value::as_str)
                        .map_or_else(|| i.to_string(), str::to_string);
                    (name, comparable_family(item))
                })
                .collect(),
            Value::Object(map) => map
                .into_iter()
                .map(|(name, item)| (name, comparable_family(item)))
                .collect(),
            _ => Map::new(),
        };
        *families = Value::Object(by_name);
    }
    tunnel
}
