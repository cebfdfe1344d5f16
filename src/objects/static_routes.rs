//! Static routes per LAN segment (`edge.segments.<segment>.staticRoutes`)
//!
//! Routes are keyed `segment/prefix`. Administrative distance is compared
//! unwrapped and as a string; next hops are compared as a set of
//! `outgoingInterface`/`nextHopAddress` pairs.

use super::{
    Device, ObjectKind, Operation, PlanContext, check_devices, device_sections, list_field,
    plan_devices, section, single, unsupported,
};
use crate::pusher::PortalRequest;
use reconcile::{
    Action, Attributes, Error, IntentRecord, Mode, Normalizer, Phase, Plan, Planner, Summary,
    TargetWork, intent::value_kind, never_in_use, partition, work_combined,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

const SECTION: &str = "staticRoutes";

/// Keys a next hop may use for its outgoing side
const OUTGOING_KEYS: [&str; 4] = [
    "thirdPartyIpsecTunnel",
    "circuit",
    "interface",
    "outgoingInterface",
];

pub struct StaticRoutes<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> StaticRoutes<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }
}

impl Planner for StaticRoutes<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let mode = match self.operation {
            Operation::Configure => Mode::Create,
            Operation::Deconfigure => Mode::Delete,
            other => return Err(unsupported(ObjectKind::StaticRoutes, other)),
        };
        let devices =
            device_sections(section(document, &[SECTION]).unwrap_or(&Value::Null), SECTION)?;
        check_devices(&devices, |config| intent_records(config, mode))?;

        plan_devices(
            &self.ctx,
            devices,
            vec![Phase::new(self.operation.to_string())],
            |device| Ok(vec![plan_device(device, mode)?]),
        )
    }
}

fn normalizer() -> Normalizer {
    OUTGOING_KEYS[..3]
        .iter()
        .fold(Normalizer::new(), |n, key| n.alias(key, "outgoingInterface"))
        .unwrap("administrativeDistance", "distance")
        .stringify("administrativeDistance")
}

/// Where a route record lives
struct RouteKey {
    segment: String,
    prefix: String,
}

fn plan_device(device: &Device<'_>, mode: Mode) -> reconcile::Result<TargetWork<PortalRequest>> {
    let (intent, keys) = intent_records(device.config, mode)?;
    let segments: Vec<&str> = keys.values().map(|k| k.segment.as_str()).collect();
    let snapshot = summaries(device.info, &segments);
    let result = partition(&intent, &snapshot, never_in_use::<Summary>, mode, &normalizer());

    let mut payload = Map::new();
    for action in &result.to_apply {
        let (Some(record), Some(key)) = (action.record(), keys.get(action.name())) else {
            continue;
        };
        let route = match action {
            Action::Delete(_) => Value::Null,
            _ => Value::Object(record.attributes.clone()),
        };
        let segment = payload
            .entry(key.segment.clone())
            .or_insert_with(|| json!({ "staticRoutes": {} }));
        if let Some(routes) = segment.get_mut("staticRoutes").and_then(Value::as_object_mut) {
            routes.insert(key.prefix.clone(), json!({ "route": route }));
        }
    }

    let document = device.patch(single("segments", Value::Object(payload)));
    Ok(work_combined(&device.target, &result, document))
}

fn intent_records(
    config: &Value,
    mode: Mode,
) -> reconcile::Result<(Vec<IntentRecord>, HashMap<String, RouteKey>)> {
    let mut records = Vec::new();
    let mut keys = HashMap::new();

    for segment in list_field(config, &["segments", "lanSegments"]) {
        let name = segment
            .get("lanSegment")
            .or_else(|| segment.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::load("segment is missing 'lanSegment'"))?;

        for (prefix, route) in route_entries(segment.get(SECTION).unwrap_or(&Value::Null))? {
            let attributes = match mode {
                Mode::Create => build_route(&prefix, &route)?,
                Mode::Delete => Attributes::new(),
            };
            let record_name = format!("{name}/{prefix}");
            if keys.contains_key(&record_name) {
                return Err(Error::load(format!("duplicate static route '{record_name}'")));
            }
            keys.insert(
                record_name.clone(),
                RouteKey {
                    segment: name.to_string(),
                    prefix,
                },
            );
            records.push(IntentRecord::new(record_name, attributes));
        }
    }
    Ok((records, keys))
}

/// Routes as `(prefix, config)`; accepts a list or a map keyed by prefix
fn route_entries(value: &Value) -> reconcile::Result<Vec<(String, Attributes)>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(routes) => routes
            .iter()
            .map(|route| {
                let map = route
                    .as_object()
                    .ok_or_else(|| Error::load("each static route must be a map"))?;
                let prefix = map
                    .get("destinationPrefix")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::load("static route is missing 'destinationPrefix'"))?;
                Ok((prefix.to_string(), map.clone()))
            })
            .collect(),
        Value::Object(routes) => routes
            .iter()
            .map(|(prefix, route)| match route {
                Value::Null => Ok((prefix.clone(), Attributes::new())),
                Value::Object(map) => Ok((prefix.clone(), map.clone())),
                other => Err(Error::load(format!(
                    "static route '{prefix}' must be a map, got {}",
                    value_kind(other)
                ))),
            })
            .collect(),
        other => Err(Error::load(format!(
            "'{SECTION}' must be a list or a map, got {}",
            value_kind(other)
        ))),
    }
}

/// Route payload as the portal expects it
fn build_route(prefix: &str, config: &Attributes) -> reconcile::Result<Attributes> {
    let mut route = Attributes::new();
    route.insert("destinationPrefix".to_string(), Value::from(prefix));
    if let Some(description) = config.get("description").filter(|v| !v.is_null()) {
        route.insert("description".to_string(), description.clone());
    }
    match config.get("administrativeDistance") {
        None | Some(Value::Null) => {}
        Some(Value::Object(wrapper)) => {
            let distance = wrapper.get("distance").ok_or_else(|| {
                Error::load(format!(
                    "route {prefix}: 'administrativeDistance' is missing 'distance'"
                ))
            })?;
            route.insert(
                "administrativeDistance".to_string(),
                json!({ "distance": distance }),
            );
        }
        Some(distance) => {
            route.insert(
                "administrativeDistance".to_string(),
                json!({ "distance": distance }),
            );
        }
    }
    let hops = match config.get("nextHops") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(hops)) => hops
            .iter()
            .map(|hop| build_next_hop(prefix, hop))
            .collect::<reconcile::Result<Vec<_>>>()?,
        Some(_) => {
            return Err(Error::load(format!("route {prefix}: 'nextHops' must be a list")));
        }
    };
    route.insert("nextHops".to_string(), Value::Array(hops));
    Ok(route)
}

fn build_next_hop(prefix: &str, hop: &Value) -> reconcile::Result<Value> {
    let invalid = || {
        Error::load(format!(
            "route {prefix}: next hop needs one of {}, nextHopAddress",
            OUTGOING_KEYS[..3].join(", ")
        ))
    };
    let hop = hop.as_object().ok_or_else(invalid)?;
    let address = hop.get("nextHopAddress").filter(|v| !v.is_null());

    for key in ["thirdPartyIpsecTunnel", "circuit"] {
        if let Some(value) = hop.get(key).filter(|v| !v.is_null()) {
            return Ok(single(key, value.clone()));
        }
    }
    if let Some(interface) = hop.get("interface").filter(|v| !v.is_null()) {
        let mut out = single("interface", interface.clone());
        if let (Some(address), Value::Object(map)) = (address, &mut out) {
            map.insert("nextHopAddress".to_string(), address.clone());
        }
        return Ok(out);
    }
    address
        .map(|address| json!({ "nextHopAddress": address }))
        .ok_or_else(invalid)
}

/// Summaries for the routes on the given segments, named `segment/prefix`
fn summaries(info: &Value, segments: &[&str]) -> Vec<Summary> {
    let mut out = Vec::new();
    for name in segments {
        let Some(segment) = find_segment(info, name) else {
            continue;
        };
        let routes = segment
            .get(SECTION)
            .or_else(|| segment.get("static_routes"))
            .unwrap_or(&Value::Null);
        for (prefix, route) in existing_routes(routes) {
            let summary_name = format!("{name}/{prefix}");
            if out.iter().any(|s: &Summary| s.name == summary_name) {
                continue;
            }
            out.push(Summary::new(summary_name).with_raw(route));
        }
    }
    out
}

/// Segment object by name; segments may be a map or a list
fn find_segment<'v>(info: &'v Value, name: &str) -> Option<&'v Value> {
    let segments = info
        .pointer("/edge/segments")
        .or_else(|| info.get("segments"))
        .or_else(|| info.get("lanSegments"))?;
    let named = |segment: &&Value| {
        ["name", "lanSegment", "segment"]
            .iter()
            .any(|key| segment.get(*key).and_then(Value::as_str) == Some(name))
    };
    match segments {
        Value::Object(map) => map.get(name).or_else(|| map.values().find(named)),
        Value::Array(items) => items.iter().find(named),
        _ => None,
    }
}

/// Existing routes as `(prefix, canonical route)`
fn existing_routes(routes: &Value) -> Vec<(String, Value)> {
    match routes {
        Value::Array(items) => items
            .iter()
            .filter_map(|route| {
                let prefix = route
                    .get("prefix")
                    .or_else(|| route.get("destinationPrefix"))
                    .and_then(Value::as_str)?;
                Some((prefix.to_string(), canonical_route(prefix, route)))
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(prefix, entry)| {
                let route = entry.get("route").filter(|r| r.is_object())?;
                Some((prefix.clone(), canonical_route(prefix, route)))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn canonical_route(prefix: &str, route: &Value) -> Value {
    let hops: Vec<Value> = route
        .get("nextHops")
        .and_then(Value::as_array)
        .map(|hops| hops.iter().filter_map(canonical_hop).collect())
        .unwrap_or_default();
    let mut out = json!({ "destinationPrefix": prefix, "nextHops": hops });
    for key in ["description", "administrativeDistance"] {
        if let Some(value) = route.get(key).filter(|v| !v.is_null()) {
            out[key] = value.clone();
        }
    }
    out
}

fn canonical_hop(hop: &Value) -> Option<Value> {
    let mut out = Map::new();
    if let Some(outgoing) = OUTGOING_KEYS
        .iter()
        .rev()
        .find_map(|key| hop.get(*key).filter(|v| !v.is_null()))
    {
        out.insert("outgoingInterface".to_string(), outgoing.clone());
    }
    if let Some(address) = hop.get("nextHopAddress").filter(|v| !v.is_null()) {
        out.insert("nextHopAddress".to_string(), address.clone());
    }
    (!out.is_empty()).then_some(Value::Object(out))
}
