//! Device NTP objects (`edge.ntpGlobalObject`)

use super::{
    Device, ObjectKind, Operation, PlanContext, check_devices, device_sections, plan_devices,
    section, single, unsupported,
};
use crate::pusher::PortalRequest;
use reconcile::{
    Error, IntentRecord, Mode, Normalizer, Partition, Phase, Plan, Planner, Summary, TargetWork,
    never_in_use, partition, records_from_section, work_combined,
};
use serde_json::{Map, Value, json};

const SECTION: &str = "ntpGlobalObject";

pub struct Ntp<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> Ntp<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }
}

impl Planner for Ntp<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let mode = match self.operation {
            Operation::Configure => Mode::Create,
            Operation::Deconfigure => Mode::Delete,
            other => return Err(unsupported(ObjectKind::Ntp, other)),
        };
        let devices =
            device_sections(section(document, &[SECTION]).unwrap_or(&Value::Null), SECTION)?;
        if devices.is_empty() {
            log::info!("No '{SECTION}' section in document");
        }
        check_devices(&devices, intent_records)?;

        plan_devices(
            &self.ctx,
            devices,
            vec![Phase::new(self.operation.to_string())],
            |device| Ok(vec![plan_device(device, mode)?]),
        )
    }
}

fn plan_device(device: &Device<'_>, mode: Mode) -> reconcile::Result<TargetWork<PortalRequest>> {
    let intent = intent_records(device.config)?;
    let snapshot = summaries(device.info);
    let result = partition(&intent, &snapshot, never_in_use::<Summary>, mode, &Normalizer::new());
    let payload = single(SECTION, Value::Object(objects(&result)));
    Ok(work_combined(&device.target, &result, device.patch(payload)))
}

/// `{name: {"config": ...}}` for every action; deletes carry a null config
fn objects(result: &Partition) -> Map<String, Value> {
    result
        .to_apply
        .iter()
        .filter_map(|action| {
            let record = action.record()?;
            let config = match action {
                reconcile::Action::Delete(_) => Value::Null,
                _ => record.to_object("name"),
            };
            Some((record.name.clone(), json!({ "config": config })))
        })
        .collect()
}

fn intent_records(config: &Value) -> reconcile::Result<Vec<IntentRecord>> {
    let mut records = records_from_section(config.get("ntps").unwrap_or(&Value::Null), "name")?;
    for record in &mut records {
        let domains = domains(record.attr("domains"))
            .map_err(|message| Error::load(format!("NTP object '{}': {message}", record.name)))?;
        record
            .attributes
            .insert("domains".to_string(), Value::from(domains));
    }
    Ok(records)
}

/// Trimmed, sorted domain names
fn domains(value: Option<&Value>) -> Result<Vec<String>, &'static str> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err("'domains' must be a list of strings"),
    };
    let mut out: Vec<String> = items
        .iter()
        .filter(|d| !d.is_null())
        .map(|d| match d {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
        .filter(|d| !d.is_empty())
        .collect();
    out.sort();
    Ok(out)
}

/// The device reports its NTP object under `ntp` (one object, or a list)
fn summaries(info: &Value) -> Vec<Summary> {
    let entries: Vec<&Value> = match info.get("ntp") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(object @ Value::Object(_)) => vec![object],
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let name = entry.get("name").and_then(Value::as_str)?;
            let domains = domains(entry.get("domains")).unwrap_or_default();
            Some(Summary::new(name).with_raw(json!({ "domains": domains })))
        })
        .collect()
}
