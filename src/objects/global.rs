//! Global objects managed through the portal's global config endpoint
//!
//! Prefix sets, routing policies, SNMP, syslog, NTP, IPFIX and VPN profiles.
//! Configure pushes one patch per kind in dependency order; deconfigure
//! deletes one object per patch in reverse order, so an in-use rejection is
//! attributed to exactly one object.
//!
//! The `lan_segments` and `site_lists` sections of the same document go
//! through their own planners into the same phase: before the global config
//! on configure, after it on deconfigure.

use super::lan_segments::{self, LanSegments};
use super::site_lists::{self, SiteLists};
use super::{
    ObjectKind, Operation, PlanContext, portal_target, single, snapshot_error, unsupported,
};
use crate::pusher::PortalRequest;
use portal::GlobalKind;
use reconcile::{
    Action, IntentRecord, Mode, Normalizer, Partition, Phase, Plan, Planner, Summary,
    TargetFailure, any_counter, counter_from_json, partition, records_from_section,
    work_combined, work_per_action,
};
use serde_json::{Map, Value, json};

const ATTACHED: [&str; 2] = ["numAttachedDevices", "numAttachedSites"];
const POLICIES: &str = "numPolicies";
const PROFILE_USES: &str = "count";

pub struct Global<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> Global<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }

    fn summaries(&self, kind: GlobalKind) -> Result<Vec<Summary>, portal::Error> {
        Ok(self
            .ctx
            .api
            .global_summaries(kind)?
            .into_iter()
            .filter_map(|raw| summary(kind, &raw))
            .collect())
    }
}

/// Document section holding objects of `kind`
pub fn section_key(kind: GlobalKind) -> &'static str {
    match kind {
        GlobalKind::PrefixSets => "global_prefix_sets",
        GlobalKind::RoutingPolicies => "routing_policies",
        GlobalKind::Snmps => "snmps",
        GlobalKind::SyslogServers => "syslog_servers",
        GlobalKind::Ntps => "ntps",
        GlobalKind::IpfixExporters => "ipfix_exporters",
        GlobalKind::VpnProfiles => "vpn_profiles",
    }
}

/// Counters that mark an object of `kind` as in use
fn usage_counters(kind: GlobalKind) -> Vec<&'static str> {
    match kind {
        GlobalKind::PrefixSets => ATTACHED.iter().copied().chain([POLICIES]).collect(),
        GlobalKind::VpnProfiles => vec![PROFILE_USES],
        _ => ATTACHED.to_vec(),
    }
}

/// Summary for one listing entry; entries without a name are dropped
fn summary(kind: GlobalKind, raw: &Value) -> Option<Summary> {
    let name = raw.get("name").and_then(Value::as_str)?;
    let summary = usage_counters(kind)
        .into_iter()
        .fold(Summary::new(name), |summary, key| {
            summary.with_counter(key, counter_from_json(raw, key))
        });
    Some(summary.with_raw(raw.clone()))
}

fn config_body(kind: GlobalKind, objects: Map<String, Value>) -> PortalRequest {
    PortalRequest::GlobalConfig {
        body: single(kind.config_key(), Value::Object(objects)),
    }
}

impl Global<'_> {
    /// One patch per kind (configure) or per object (deconfigure) into
    /// `phase`; a failed listing stops at that kind
    fn plan_config(
        &self,
        sections: Vec<(GlobalKind, Vec<IntentRecord>)>,
        mode: Mode,
        phase: &mut Phase<PortalRequest>,
    ) -> Option<TargetFailure> {
        let target = portal_target();
        for (kind, records) in sections {
            log::info!("Planning {} {kind} object(s)", records.len());
            let snapshot = match self.summaries(kind) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    return Some(TargetFailure {
                        error: snapshot_error(target.name.clone(), &err),
                        target: target.name,
                    });
                }
            };
            let counters = usage_counters(kind);
            let in_use = any_counter::<Summary>(&counters);
            let result = partition(&records, &snapshot, in_use, mode, &Normalizer::new());
            if !result.blocked.is_empty() {
                log::warn!(
                    "{kind}(s) in use ({}), left untouched: {:?}",
                    counters.join(" or "),
                    result.blocked
                );
            }
            phase.add(match mode {
                Mode::Create => {
                    work_combined(&target, &result, config_body(kind, configs(&result)))
                }
                Mode::Delete => work_per_action(&target, &result, |action| {
                    let mut objects = Map::new();
                    objects.insert(action.name().to_string(), json!({ "config": null }));
                    Some(config_body(kind, objects))
                }),
            });
        }
        None
    }

    /// LAN segments and site lists from the same document, in dependency
    /// order for `mode`
    fn plan_segments_and_lists(
        &self,
        document: &Value,
        mode: Mode,
        phase: &mut Phase<PortalRequest>,
        failures: &mut Vec<TargetFailure>,
    ) -> reconcile::Result<()> {
        let segments = LanSegments::new(self.ctx, self.operation);
        let lists = SiteLists::new(self.ctx, self.operation);
        let planners: [&dyn Planner<Document = PortalRequest>; 2] = match mode {
            Mode::Create => [&segments, &lists],
            Mode::Delete => [&lists, &segments],
        };
        for planner in planners {
            let plan = planner.plan(document)?;
            for work in plan.phases.into_iter().flat_map(|p| p.work) {
                phase.add(work);
            }
            failures.extend(plan.failures);
        }
        Ok(())
    }
}

impl Planner for Global<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let mode = match self.operation {
            Operation::Configure => Mode::Create,
            Operation::Deconfigure => Mode::Delete,
            other => return Err(unsupported(ObjectKind::Global, other)),
        };

        let mut sections = Vec::new();
        for kind in GlobalKind::ALL {
            let section = document.get(section_key(kind)).unwrap_or(&Value::Null);
            let records = records_from_section(section, "name")?;
            if !records.is_empty() {
                sections.push((kind, records));
            }
        }
        if sections.is_empty() {
            log::info!("No global objects in document");
        }
        lan_segments::records(document)?;
        site_lists::records(document)?;
        if mode == Mode::Delete {
            sections.reverse();
        }

        let mut phase = Phase::new(self.operation.to_string());
        let mut failures = Vec::new();
        match mode {
            Mode::Create => {
                self.plan_segments_and_lists(document, mode, &mut phase, &mut failures)?;
                failures.extend(self.plan_config(sections, mode, &mut phase));
            }
            Mode::Delete => {
                failures.extend(self.plan_config(sections, mode, &mut phase));
                self.plan_segments_and_lists(document, mode, &mut phase, &mut failures)?;
            }
        }

        let mut plan = reconcile::stage([phase])?;
        if !failures.is_empty() {
            plan.phases.clear();
            plan.failures = failures;
        }
        Ok(plan)
    }
}

/// `{name: {"config": {...}}}` for every create or update
fn configs(result: &Partition) -> Map<String, Value> {
    result
        .to_apply
        .iter()
        .filter_map(|action| match action {
            Action::Create(record) | Action::Update { record, .. } => Some((
                record.name.clone(),
                json!({ "config": record.to_object("name") }),
            )),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pusher::PortalPusher;
    use portal::{MockPortal, endpoints};
    use reconcile::{Error, ExecuteOptions, execute_simple};

    fn run(mock: &MockPortal, operation: Operation, document: &Value) -> reconcile::Report {
        let plan = Global::new(PlanContext::new(mock, 2), operation)
            .plan(document)
            .unwrap();
        execute_simple(plan, &ExecuteOptions::default(), &PortalPusher::new(mock)).unwrap()
    }

    #[test]
    fn test_configure_one_patch_per_kind_in_order() {
        let mock = MockPortal::new();
        mock.add_summary(GlobalKind::Snmps, json!({"name": "snmp-b", "engineId": "old"}));
        let document = json!({
            "snmps": [{"name": "snmp-b", "engineId": "x"}],
            "global_prefix_sets": [
                {"name": "pfx-1", "entries": [{"prefix": "10.0.0.0/8"}]},
                {"name": "pfx-2"}
            ]
        });

        let report = run(&mock, Operation::Configure, &document);
        assert_eq!(report.outcome.created, vec!["pfx-1", "pfx-2"]);
        assert_eq!(report.outcome.updated, vec!["snmp-b"]);

        let sent = mock.requests_to(endpoints::GLOBAL_CONFIG);
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0].body,
            json!({"globalPrefixSets": {
                "pfx-1": {"config": {"name": "pfx-1", "entries": [{"prefix": "10.0.0.0/8"}]}},
                "pfx-2": {"config": {"name": "pfx-2"}}
            }})
        );
        assert_eq!(
            sent[1].body,
            json!({"snmps": {"snmp-b": {"config": {"name": "snmp-b", "engineId": "x"}}}})
        );
    }

    #[test]
    fn test_configure_leaves_attached_object_alone() {
        let mock = MockPortal::new();
        mock.add_summary(GlobalKind::Snmps, json!({"name": "snmp-a", "numAttachedSites": 3}));
        mock.add_summary(GlobalKind::Snmps, json!({"name": "snmp-b"}));
        let document = json!({"snmps": [
            {"name": "snmp-a", "engineId": "x"},
            {"name": "snmp-b", "engineId": "y"}
        ]});

        let report = run(&mock, Operation::Configure, &document);
        assert_eq!(report.outcome.failed_objects, vec!["snmp-a"]);
        assert_eq!(report.outcome.updated, vec!["snmp-b"]);
        assert!(report.outcome.failed);

        let sent = mock.requests_to(endpoints::GLOBAL_CONFIG);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].body,
            json!({"snmps": {"snmp-b": {"config": {"name": "snmp-b", "engineId": "y"}}}})
        );
    }

    #[test]
    fn test_configure_twice_second_run_unchanged() {
        let mock = MockPortal::new();
        let document = json!({"ntps": [{"name": "ntp-a", "domains": ["a.example"]}]});

        let first = run(&mock, Operation::Configure, &document);
        assert_eq!(first.outcome.created, vec!["ntp-a"]);
        mock.add_summary(
            GlobalKind::Ntps,
            json!({"name": "ntp-a", "domains": ["a.example"], "numAttachedDevices": 0}),
        );

        let second = run(&mock, Operation::Configure, &document);
        assert!(!second.outcome.changed);
        assert_eq!(second.outcome.unchanged, vec!["ntp-a"]);
        assert_eq!(mock.requests_to(endpoints::GLOBAL_CONFIG).len(), 1);
    }

    #[test]
    fn test_configure_includes_segments_and_site_lists() {
        let mock = MockPortal::new();
        mock.add_site(11, "branch-1");
        let document = json!({
            "ntps": [{"name": "ntp-a"}],
            "lan_segments": [{"name": "guest", "description": "Guest"}],
            "site_lists": [{"name": "branches", "sites": ["branch-1"]}]
        });

        let report = run(&mock, Operation::Configure, &document);
        assert_eq!(report.outcome.created, vec!["guest", "branches", "ntp-a"]);

        let paths: Vec<String> = mock.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(
            paths,
            vec![endpoints::LAN_SEGMENTS, endpoints::SITE_LISTS, endpoints::GLOBAL_CONFIG]
        );
    }

    #[test]
    fn test_deconfigure_removes_site_lists_then_segments_last() {
        let mock = MockPortal::new();
        mock.add_summary(GlobalKind::Ntps, json!({"name": "ntp-a"}));
        mock.add_lan_segment(portal::LanSegment {
            id: 3,
            name: "guest".to_string(),
            ..Default::default()
        });
        mock.add_site_list(portal::SiteList {
            id: 5,
            name: "branches".to_string(),
            ..Default::default()
        });
        let document = json!({
            "ntps": ["ntp-a"],
            "lan_segments": ["guest"],
            "site_lists": ["branches"]
        });

        let report = run(&mock, Operation::Deconfigure, &document);
        assert_eq!(report.outcome.deleted, vec!["ntp-a", "branches", "guest"]);

        let paths: Vec<String> = mock.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(
            paths,
            vec![
                endpoints::GLOBAL_CONFIG.to_string(),
                endpoints::site_list(5),
                endpoints::lan_segment(3)
            ]
        );
    }

    #[test]
    fn test_bad_site_lists_section_fails_before_any_call() {
        let mock = MockPortal::new();
        let planner = Global::new(PlanContext::new(&mock, 1), Operation::Configure);
        let result = planner.plan(&json!({
            "ntps": [{"name": "ntp-a"}],
            "site_lists": {"branches": {}}
        }));
        assert!(matches!(result, Err(Error::Load(_))));
        assert!(mock.reads().is_empty());
    }

    #[test]
    fn test_deconfigure_partitions_by_usage() {
        let mock = MockPortal::new();
        mock.add_summary(GlobalKind::SyslogServers, json!({"name": "log-free"}));
        mock.add_summary(
            GlobalKind::SyslogServers,
            json!({"name": "log-used", "numAttachedDevices": 1}),
        );
        let document = json!({"syslog_servers": ["log-free", "log-used", "log-gone"]});

        let report = run(&mock, Operation::Deconfigure, &document);
        assert_eq!(report.outcome.deleted, vec!["log-free"]);
        assert_eq!(report.outcome.skipped, vec!["log-gone"]);
        assert_eq!(report.outcome.failed_objects, vec!["log-used"]);
        assert!(report.outcome.failed);

        let sent = mock.requests_to(endpoints::GLOBAL_CONFIG);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, json!({"syslogServers": {"log-free": {"config": null}}}));
    }

    #[test]
    fn test_prefix_sets_blocked_by_policies_only_on_prefix_sets() {
        let mock = MockPortal::new();
        mock.add_summary(GlobalKind::PrefixSets, json!({"name": "pfx", "numPolicies": 2}));
        mock.add_summary(GlobalKind::Snmps, json!({"name": "snmp", "numPolicies": 2}));
        let document = json!({"global_prefix_sets": ["pfx"], "snmps": ["snmp"]});

        let report = run(&mock, Operation::Deconfigure, &document);
        assert_eq!(report.outcome.failed_objects, vec!["pfx"]);
        assert_eq!(report.outcome.deleted, vec!["snmp"]);
    }

    #[test]
    fn test_deconfigure_runs_in_reverse_dependency_order() {
        let mock = MockPortal::new();
        mock.add_summary(GlobalKind::PrefixSets, json!({"name": "pfx"}));
        mock.add_summary(GlobalKind::RoutingPolicies, json!({"name": "policy"}));
        let document = json!({"global_prefix_sets": ["pfx"], "routing_policies": ["policy"]});

        run(&mock, Operation::Deconfigure, &document);
        let sent = mock.requests_to(endpoints::GLOBAL_CONFIG);
        assert_eq!(sent.len(), 2);
        assert!(sent[0].body.get("routingPolicies").is_some());
        assert!(sent[1].body.get("globalPrefixSets").is_some());
    }

    #[test]
    fn test_vpn_profiles_use_count() {
        let mock = MockPortal::new();
        mock.add_summary(GlobalKind::VpnProfiles, json!({"name": "ike-a", "count": 1}));
        mock.add_summary(GlobalKind::VpnProfiles, json!({"name": "ike-b", "count": 0}));
        let document = json!({"vpn_profiles": ["ike-a", "ike-b"]});

        let report = run(&mock, Operation::Deconfigure, &document);
        assert_eq!(report.outcome.failed_objects, vec!["ike-a"]);
        assert_eq!(report.outcome.deleted, vec!["ike-b"]);
    }

    #[test]
    fn test_in_use_rejection_at_push_is_blocked() {
        let mock = MockPortal::new();
        mock.add_summary(GlobalKind::Ntps, json!({"name": "ntp-a"}));
        mock.fail_on(endpoints::GLOBAL_CONFIG, 409, "object is referenced by a site");
        let report = run(&mock, Operation::Deconfigure, &json!({"ntps": ["ntp-a"]}));
        assert_eq!(report.outcome.failed_objects, vec!["ntp-a"]);
        assert!(report.outcome.deleted.is_empty());
    }

    #[test]
    fn test_missing_name_is_load_error() {
        let mock = MockPortal::new();
        let planner = Global::new(PlanContext::new(&mock, 1), Operation::Configure);
        let result = planner.plan(&json!({"snmps": [{"engineId": "x"}]}));
        assert!(matches!(result, Err(Error::Load(_))));
    }
}
