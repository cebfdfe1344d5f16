//! Global site lists
//!
//! Member sites are given by name and resolved to ids when planning. The
//! listing call carries no reference counters, so each named site list that
//! exists is fetched on its own. A referenced site list is left alone in
//! both directions.

use super::{ObjectKind, Operation, PlanContext, portal_target, snapshot_error, unsupported};
use crate::pusher::PortalRequest;
use reconcile::{
    Action, Error, IntentRecord, Mode, Normalizer, Phase, Plan, Planner, Summary, any_counter,
    partition, records_from_section, work_per_action,
};
use serde_json::{Value, json};
use std::collections::HashMap;

const SECTION: &str = "site_lists";
const REFERENCES: [&str; 3] = ["siteListReferences", "edgeReferences", "policyReferences"];

pub struct SiteLists<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> SiteLists<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }

    /// Summaries of the existing site lists named in `records`, with their
    /// reference counters
    fn snapshot(
        &self,
        records: &[IntentRecord],
    ) -> portal::Result<(Vec<Summary>, HashMap<String, i64>)> {
        let mut summaries = Vec::new();
        let mut ids = HashMap::new();
        for list in self.ctx.api.site_lists()? {
            if !records.iter().any(|r| r.name == list.name) {
                continue;
            }
            let list = self.ctx.api.site_list(list.id)?;
            summaries.push(
                Summary::new(list.name.clone())
                    .with_counter("siteListReferences", list.site_list_references)
                    .with_counter("edgeReferences", list.edge_references)
                    .with_counter("policyReferences", list.policy_references),
            );
            ids.insert(list.name, list.id);
        }
        Ok((summaries, ids))
    }

    /// Site ids for every site list that will be created; an unknown site
    /// fails the whole run
    fn member_ids(
        &self,
        creates: &[&IntentRecord],
    ) -> reconcile::Result<HashMap<String, Vec<i64>>> {
        if creates.is_empty() {
            return Ok(HashMap::new());
        }
        let sites: HashMap<String, i64> = self
            .ctx
            .api
            .sites()
            .map_err(|e| snapshot_error("portal", &e))?
            .into_iter()
            .map(|s| (s.name, s.id))
            .collect();

        let mut members = HashMap::new();
        for record in creates {
            let names = match record.attr("sites") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
                Some(_) => {
                    return Err(Error::load(format!(
                        "site list '{}': 'sites' must be a list of site names",
                        record.name
                    )));
                }
            };
            let ids = names
                .into_iter()
                .map(|site| {
                    sites.get(site).copied().ok_or_else(|| {
                        Error::load(format!(
                            "site '{site}' not found for site list '{}'; create the site first",
                            record.name
                        ))
                    })
                })
                .collect::<reconcile::Result<Vec<i64>>>()?;
            members.insert(record.name.clone(), ids);
        }
        Ok(members)
    }
}

/// The document's `site_lists` section
pub fn records(document: &Value) -> reconcile::Result<Vec<IntentRecord>> {
    let section = match document.get(SECTION) {
        None | Some(Value::Null) => &Value::Null,
        Some(list @ Value::Array(_)) => list,
        Some(_) => return Err(Error::load("'site_lists' must be a list")),
    };
    records_from_section(section, "name")
}

impl Planner for SiteLists<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let mode = match self.operation {
            Operation::Configure | Operation::Create => Mode::Create,
            Operation::Deconfigure | Operation::Delete => Mode::Delete,
            other => return Err(unsupported(ObjectKind::SiteLists, other)),
        };
        let records = records(document)?;
        let target = portal_target();
        let mut phase = Phase::new(self.operation.to_string());
        if records.is_empty() {
            log::info!("No site lists in document");
            return reconcile::stage([phase]);
        }

        let (snapshot, ids) = match self.snapshot(&records) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let mut plan = reconcile::stage([phase])?;
                plan.fail_target(target.name, snapshot_error("portal", &err));
                return Ok(plan);
            }
        };

        let names: Vec<IntentRecord> = records
            .iter()
            .map(|r| IntentRecord::named(r.name.clone()))
            .collect();
        let in_use = any_counter::<Summary>(&REFERENCES);
        let result = partition(&names, &snapshot, in_use, mode, &Normalizer::new());
        if !result.blocked.is_empty() {
            log::warn!("Site list(s) still referenced, left untouched: {:?}", result.blocked);
        }

        let creates: Vec<&IntentRecord> = result
            .to_apply
            .iter()
            .filter(|a| matches!(a, Action::Create(_)))
            .filter_map(|a| records.iter().find(|r| r.name == a.name()))
            .collect();
        let members = self.member_ids(&creates)?;

        phase.add(work_per_action(&target, &result, |action| match action {
            Action::Create(record) => {
                let full = creates.iter().find(|r| r.name == record.name)?;
                Some(PortalRequest::CreateSiteList {
                    body: json!({
                        "name": record.name,
                        "description": full.str_attr("description").unwrap_or_default(),
                        "sites": members.get(&record.name).cloned().unwrap_or_default(),
                    }),
                })
            }
            Action::Delete(record) => ids
                .get(&record.name)
                .map(|id| PortalRequest::DeleteSiteList { id: *id }),
            _ => None,
        }));
        reconcile::stage([phase])
    }
}
