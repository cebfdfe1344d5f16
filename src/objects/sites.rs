//! Sites and the global objects attached to them
//!
//! `sites` lists sites to create or delete; `site_attachments` lists, per
//! site, the SNMP, syslog and IPFIX objects to attach or detach. The portal
//! does not report a site's attachments, so every listed site gets one
//! attach/detach request and "already attached"/"not attached" rejections
//! are settled by the phase classifier.
//!
//! Each site is its own target: a site whose detach fails is not deleted.

use super::{ObjectKind, Operation, PlanContext, device_sections, snapshot_error, unsupported};
use crate::pusher::PortalRequest;
use reconcile::{
    Action, ChangeKind, Error, ErrorClassifier, IntentRecord, Mode, Normalizer, Patch,
    PatchObject, Phase, Plan, Planner, Summary, Target, TargetId, TargetWork, never_in_use,
    partition, records_from_section,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

const SITES: &str = "sites";
const ATTACHMENTS: &str = "site_attachments";

pub const CREATE_PHASE: &str = "create";
pub const ATTACH_PHASE: &str = "attach";
pub const DETACH_PHASE: &str = "detach";
pub const DELETE_PHASE: &str = "delete";

pub struct Sites<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> Sites<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }
}

fn site_target(name: &str) -> Target {
    Target::new(TargetId::new(format!("site:{name}")), name)
}

/// Attach or detach, as the portal spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Attach,
    Detach,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Attach => "Attach",
            Direction::Detach => "Detach",
        }
    }

    fn change(self) -> ChangeKind {
        match self {
            Direction::Attach => ChangeKind::Attached,
            Direction::Detach => ChangeKind::Detached,
        }
    }

    fn phase(self) -> Phase<PortalRequest> {
        match self {
            Direction::Attach => {
                Phase::new(ATTACH_PHASE).with_classifier(ErrorClassifier::attach())
            }
            Direction::Detach => {
                Phase::new(DETACH_PHASE).with_classifier(ErrorClassifier::detach())
            }
        }
    }
}

impl Planner for Sites<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let steps: &[&str] = match self.operation {
            Operation::Configure => &[CREATE_PHASE, ATTACH_PHASE],
            Operation::Deconfigure => &[DETACH_PHASE, DELETE_PHASE],
            Operation::Create => &[CREATE_PHASE],
            Operation::Delete => &[DELETE_PHASE],
            Operation::Attach => &[ATTACH_PHASE],
            Operation::Detach => &[DETACH_PHASE],
            other => return Err(unsupported(ObjectKind::Sites, other)),
        };

        let wants_sites = steps.contains(&CREATE_PHASE) || steps.contains(&DELETE_PHASE);
        let sites = if wants_sites {
            records_from_section(document.get(SITES).unwrap_or(&Value::Null), "name")?
        } else {
            Vec::new()
        };
        let attachments = if steps.contains(&ATTACH_PHASE) || steps.contains(&DETACH_PHASE) {
            let direction = if steps.contains(&ATTACH_PHASE) {
                Direction::Attach
            } else {
                Direction::Detach
            };
            device_sections(document.get(ATTACHMENTS).unwrap_or(&Value::Null), ATTACHMENTS)?
                .into_iter()
                .map(|(site, data)| Ok((site.clone(), attachment_body(&site, &data, direction)?)))
                .collect::<reconcile::Result<Vec<(String, Value)>>>()?
        } else {
            Vec::new()
        };

        let mut failures: Vec<(String, Error)> = Vec::new();
        let existing: HashMap<String, i64> = if sites.is_empty() && attachments.is_empty() {
            log::info!("No sites or site attachments in document");
            HashMap::new()
        } else {
            match self.ctx.api.sites() {
                Ok(list) => list.into_iter().map(|s| (s.name, s.id)).collect(),
                Err(err) => {
                    let names = sites
                        .iter()
                        .map(|r| r.name.clone())
                        .chain(attachments.iter().map(|(site, _)| site.clone()));
                    let mut plan = reconcile::stage(Vec::<Phase<PortalRequest>>::new())?;
                    for name in names {
                        plan.fail_target(name.clone(), snapshot_error(name, &err));
                    }
                    return Ok(plan);
                }
            }
        };

        let mut phases = Vec::new();
        for step in steps {
            let phase = match *step {
                CREATE_PHASE => site_phase(CREATE_PHASE, &sites, &existing, Mode::Create),
                DELETE_PHASE => site_phase(DELETE_PHASE, &sites, &existing, Mode::Delete),
                ATTACH_PHASE => {
                    let mut phase = Direction::Attach.phase();
                    for (site, body) in &attachments {
                        let created_here = steps.contains(&CREATE_PHASE)
                            && sites.iter().any(|r| &r.name == site);
                        if existing.contains_key(site) || created_here {
                            phase.add(attachment_work(site, body, Direction::Attach));
                        } else {
                            failures.push((
                                site.clone(),
                                Error::Resolution {
                                    kind: "site".to_string(),
                                    name: site.clone(),
                                },
                            ));
                        }
                    }
                    phase
                }
                _ => {
                    let mut phase = Direction::Detach.phase();
                    for (site, body) in &attachments {
                        if existing.contains_key(site) {
                            phase.add(attachment_work(site, body, Direction::Detach));
                        } else {
                            log::info!("Site '{site}' not found, nothing to detach");
                            let mut work = TargetWork::new(site_target(site));
                            work.skipped.push(site.clone());
                            phase.add(work);
                        }
                    }
                    phase
                }
            };
            phases.push(phase);
        }

        let mut plan = reconcile::stage(phases)?;
        for (site, error) in failures {
            plan.fail_target(site, error);
        }
        Ok(plan)
    }
}

/// Create or delete sites, one target per site
fn site_phase(
    name: &str,
    sites: &[IntentRecord],
    existing: &HashMap<String, i64>,
    mode: Mode,
) -> Phase<PortalRequest> {
    let snapshot: Vec<Summary> = existing.keys().map(Summary::new).collect();
    let mut phase = Phase::new(name);
    for record in sites {
        let target = site_target(&record.name);
        let result = partition(
            &[IntentRecord::named(record.name.clone())],
            &snapshot,
            never_in_use::<Summary>,
            mode,
            &Normalizer::new(),
        );
        let mut work = TargetWork::new(target);
        work.absorb(&result);
        for action in &result.to_apply {
            let request = match action {
                Action::Create(_) => PortalRequest::CreateSite {
                    body: json!({"site": {
                        "name": record.name,
                        "location": record.attr("location").cloned().unwrap_or_else(|| json!({})),
                    }}),
                },
                Action::Delete(_) => match existing.get(&record.name) {
                    Some(id) => PortalRequest::DeleteSite { id: *id },
                    None => continue,
                },
                _ => continue,
            };
            if let Some(object) = PatchObject::from_action(action) {
                work.push(Patch::new(request).with_object(object));
            }
        }
        phase.add(work);
    }
    phase
}

fn attachment_work(site: &str, body: &Value, direction: Direction) -> TargetWork<PortalRequest> {
    let mut work = TargetWork::new(site_target(site));
    work.push(
        Patch::new(PortalRequest::SiteConfig {
            site: site.to_string(),
            body: body.clone(),
        })
        .with_object(PatchObject::new(site, direction.change())),
    );
    work
}

/// `{"site": {"name", "snmpOps", "syslogServerOpsV2", "ipfixExporterOpsV2"}}`
fn attachment_body(site: &str, data: &Value, direction: Direction) -> reconcile::Result<Value> {
    let mut body = Map::new();
    body.insert("name".to_string(), Value::String(site.to_string()));

    for key in ["snmps", "snmp_servers"] {
        if let Some(items) = data.get(key) {
            let ops: Map<String, Value> = entries(items, key)?
                .iter()
                .map(|(name, _)| (name.clone(), Value::String(direction.verb().to_string())))
                .collect();
            body.insert("snmpOps".to_string(), Value::Object(ops));
        }
    }
    for (key, field) in [
        ("syslog_servers", "syslogServerOpsV2"),
        ("ipfix_exporters", "ipfixExporterOpsV2"),
    ] {
        if let Some(items) = data.get(key) {
            let ops: Map<String, Value> = entries(items, key)?
                .into_iter()
                .map(|(name, interface)| {
                    let mut op = json!({ "operation": direction.verb() });
                    if let Some(interface) = interface {
                        op["interface"] = json!({ "interface": interface });
                    }
                    (name, op)
                })
                .collect();
            body.insert(field.to_string(), Value::Object(ops));
        }
    }

    Ok(json!({ "site": body }))
}

/// Object names with their optional interface; entries are names or
/// `{name, interface}` maps
fn entries(items: &Value, key: &str) -> reconcile::Result<Vec<(String, Option<Value>)>> {
    let Value::Array(items) = items else {
        return Err(Error::load(format!("'{key}' must be a list")));
    };
    items
        .iter()
        .map(|item| {
            let record = IntentRecord::from_value(item, "name")
                .map_err(|_| Error::load(format!("'{key}' entries must include a 'name'")))?;
            Ok((record.name, item.get("interface").cloned()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pusher::PortalPusher;
    use portal::{MockPortal, endpoints};
    use reconcile::{ExecuteOptions, execute_simple};

    fn run(mock: &MockPortal, operation: Operation, document: &Value) -> reconcile::Report {
        let plan = Sites::new(PlanContext::new(mock, 2), operation)
            .plan(document)
            .unwrap();
        execute_simple(plan, &ExecuteOptions::default(), &PortalPusher::new(mock)).unwrap()
    }

    #[test]
    fn test_attach_body() {
        let body = attachment_body(
            "branch",
            &json!({
                "snmps": ["snmp-a"],
                "syslog_servers": ["log-a", {"name": "log-b", "interface": "GigabitEthernet1/0/0"}],
                "ipfix_exporters": [{"name": "ipfix-a"}]
            }),
            Direction::Attach,
        )
        .unwrap();
        assert_eq!(
            body,
            json!({"site": {
                "name": "branch",
                "snmpOps": {"snmp-a": "Attach"},
                "syslogServerOpsV2": {
                    "log-a": {"operation": "Attach"},
                    "log-b": {
                        "operation": "Attach",
                        "interface": {"interface": "GigabitEthernet1/0/0"}
                    }
                },
                "ipfixExporterOpsV2": {"ipfix-a": {"operation": "Attach"}}
            }})
        );
    }

    #[test]
    fn test_create_only_missing_sites() {
        let mock = MockPortal::new();
        mock.add_site(3, "hq");
        let document = json!({"sites": [
            {"name": "hq"},
            {"name": "branch", "location": {"city": "Porto"}}
        ]});

        let report = run(&mock, Operation::Create, &document);
        assert_eq!(report.outcome.created, vec!["branch"]);
        assert!(report.outcome.unchanged.contains(&"hq".to_string()));

        let sent = mock.requests_to(endpoints::SITES);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].body,
            json!({"site": {"name": "branch", "location": {"city": "Porto"}}})
        );
    }

    #[test]
    fn test_configure_creates_then_attaches() {
        let mock = MockPortal::new();
        let document = json!({
            "sites": [{"name": "branch"}],
            "site_attachments": [{"branch": {"snmps": ["snmp-a"]}}]
        });

        let plan = Sites::new(PlanContext::new(&mock, 1), Operation::Configure)
            .plan(&document)
            .unwrap();
        let names: Vec<&str> = plan.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec![CREATE_PHASE, ATTACH_PHASE]);
        assert!(plan.failures.is_empty());
        assert_eq!(plan.patch_count(), 2);
    }

    #[test]
    fn test_attach_unknown_site_fails_that_site() {
        let mock = MockPortal::new();
        mock.add_site(3, "hq");
        let document = json!({"site_attachments": [
            {"hq": {"snmps": ["snmp-a"]}},
            {"ghost": {"snmps": ["snmp-a"]}}
        ]});

        let report = run(&mock, Operation::Attach, &document);
        assert_eq!(report.outcome.attached, vec!["hq"]);
        assert!(report.targets["ghost"].error.is_some());
        assert_eq!(mock.requests_to(&endpoints::site(3)).len(), 1);
    }

    #[test]
    fn test_already_attached_is_skipped() {
        let mock = MockPortal::new();
        mock.add_site(3, "hq");
        mock.fail_on(endpoints::site(3), 400, "snmp-a is already attached to site");
        let document = json!({"site_attachments": [{"hq": {"snmps": ["snmp-a"]}}]});

        let report = run(&mock, Operation::Attach, &document);
        assert!(report.outcome.attached.is_empty());
        assert_eq!(report.outcome.skipped, vec!["hq"]);
        assert!(report.targets["hq"].error.is_none());
    }

    #[test]
    fn test_deconfigure_detaches_then_deletes() {
        let mock = MockPortal::new();
        mock.add_site(3, "hq");
        let document = json!({
            "sites": ["hq", "gone"],
            "site_attachments": [{"hq": {"snmps": ["snmp-a"]}}, {"gone": {"snmps": ["snmp-a"]}}]
        });

        let report = run(&mock, Operation::Deconfigure, &document);
        assert_eq!(report.outcome.detached, vec!["hq"]);
        assert_eq!(report.outcome.deleted, vec!["hq"]);
        assert!(report.outcome.skipped.contains(&"gone".to_string()));

        let sent = mock.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].method, "POST");
        assert_eq!(
            sent[0].body,
            json!({"site": {"name": "hq", "snmpOps": {"snmp-a": "Detach"}}})
        );
        assert_eq!(sent[1].method, "DELETE");
    }

    #[test]
    fn test_failed_detach_keeps_site() {
        let mock = MockPortal::new();
        mock.add_site(3, "hq");
        mock.fail_on(endpoints::site(3), 500, "internal error");
        let document = json!({
            "sites": ["hq"],
            "site_attachments": [{"hq": {"snmps": ["snmp-a"]}}]
        });

        let report = run(&mock, Operation::Deconfigure, &document);
        assert!(report.outcome.deleted.is_empty());
        assert_eq!(report.targets["hq"].halted_at.as_deref(), Some(DETACH_PHASE));
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_syslog_entry_without_name_is_load_error() {
        let mock = MockPortal::new();
        let planner = Sites::new(PlanContext::new(&mock, 1), Operation::Attach);
        let result = planner.plan(&json!({"site_attachments": [
            {"hq": {"syslog_servers": [{"interface": "ge-0"}]}}
        ]}));
        assert!(matches!(result, Err(Error::Load(_))));
    }
}
