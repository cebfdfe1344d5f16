//! Global LAN segments
//!
//! Segments are created by name and never updated; an existing free segment
//! is reported unchanged whatever its description. A segment that any site
//! list, edge or interface refers to is left alone in both directions.

use super::{ObjectKind, Operation, PlanContext, portal_target, snapshot_error, unsupported};
use crate::pusher::PortalRequest;
use reconcile::{
    Action, IntentRecord, Mode, Normalizer, Phase, Plan, Planner, Summary, any_counter,
    partition, records_from_section, work_per_action,
};
use serde_json::Value;
use std::collections::HashMap;

const SECTION: &str = "lan_segments";
const REFERENCES: [&str; 3] = ["siteListReferences", "edgeReferences", "associatedInterfaces"];

pub struct LanSegments<'a> {
    ctx: PlanContext<'a>,
    operation: Operation,
}

impl<'a> LanSegments<'a> {
    pub fn new(ctx: PlanContext<'a>, operation: Operation) -> Self {
        Self { ctx, operation }
    }
}

/// The document's `lan_segments` section
pub fn records(document: &Value) -> reconcile::Result<Vec<IntentRecord>> {
    records_from_section(document.get(SECTION).unwrap_or(&Value::Null), "name")
}

fn summary(segment: &portal::LanSegment) -> Summary {
    Summary::new(&segment.name)
        .with_counter("siteListReferences", segment.site_list_references)
        .with_counter("edgeReferences", segment.edge_references)
        .with_counter("associatedInterfaces", segment.associated_interfaces)
}

impl Planner for LanSegments<'_> {
    type Document = PortalRequest;

    fn plan(&self, document: &Value) -> reconcile::Result<Plan<PortalRequest>> {
        let mode = match self.operation {
            Operation::Configure | Operation::Create => Mode::Create,
            Operation::Deconfigure | Operation::Delete => Mode::Delete,
            other => return Err(unsupported(ObjectKind::LanSegments, other)),
        };
        let records = records(document)?;
        let target = portal_target();
        let mut phase = Phase::new(self.operation.to_string());
        if records.is_empty() {
            log::info!("No LAN segments in document");
            return reconcile::stage([phase]);
        }

        let segments = match self.ctx.api.lan_segments() {
            Ok(segments) => segments,
            Err(err) => {
                let mut plan = reconcile::stage([phase])?;
                plan.fail_target(target.name, snapshot_error("portal", &err));
                return Ok(plan);
            }
        };
        if segments.is_empty() {
            log::info!("No LAN segments exist on the portal");
        }
        let ids: HashMap<&str, i64> = segments.iter().map(|s| (s.name.as_str(), s.id)).collect();
        let snapshot: Vec<Summary> = segments.iter().map(summary).collect();

        // Existence is all that counts; descriptions are only sent on create
        let names: Vec<IntentRecord> = records
            .iter()
            .map(|r| IntentRecord::named(r.name.clone()))
            .collect();
        let descriptions: HashMap<&str, &str> = records
            .iter()
            .map(|r| (r.name.as_str(), r.str_attr("description").unwrap_or_default()))
            .collect();

        let in_use = any_counter::<Summary>(&REFERENCES);
        let result = partition(&names, &snapshot, in_use, mode, &Normalizer::new());
        if !result.blocked.is_empty() {
            log::warn!("LAN segment(s) still referenced, left untouched: {:?}", result.blocked);
        }

        phase.add(work_per_action(&target, &result, |action| match action {
            Action::Create(record) => Some(PortalRequest::CreateLanSegment {
                name: record.name.clone(),
                description: descriptions
                    .get(record.name.as_str())
                    .copied()
                    .unwrap_or_default()
                    .to_string(),
            }),
            Action::Delete(record) => ids
                .get(record.name.as_str())
                .map(|id| PortalRequest::DeleteLanSegment { id: *id }),
            _ => None,
        }));
        reconcile::stage([phase])
    }
}
