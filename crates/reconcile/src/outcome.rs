//! Outcome aggregation - merges per-target, per-phase results into a report

use crate::error::{Error, Result};
use crate::planner::PatchObject;
use crate::types::ChangeKind;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// What one reconciliation did, by object name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// At least one patch was pushed (or would be, in check mode)
    pub changed: bool,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub attached: Vec<String>,
    pub detached: Vec<String>,
    /// Nothing to do: absent on delete, or gone by the time of the push
    pub skipped: Vec<String>,
    /// Present but in use
    pub failed_objects: Vec<String>,
    /// Present and already matching
    pub unchanged: Vec<String>,
    /// `failed_objects` is non-empty
    pub failed: bool,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record objects of an acknowledged patch
    pub fn record_applied<'a>(&mut self, objects: impl IntoIterator<Item = &'a PatchObject>) {
        for object in objects {
            let list = match object.change {
                ChangeKind::Created => &mut self.created,
                ChangeKind::Updated => &mut self.updated,
                ChangeKind::Deleted => &mut self.deleted,
                ChangeKind::Attached => &mut self.attached,
                ChangeKind::Detached => &mut self.detached,
            };
            list.push(object.name.clone());
            self.changed = true;
        }
    }

    pub fn record_skipped(&mut self, names: impl IntoIterator<Item = String>) {
        self.skipped.extend(names);
    }

    pub fn record_blocked(&mut self, names: impl IntoIterator<Item = String>) {
        self.failed_objects.extend(names);
        self.failed = !self.failed_objects.is_empty();
    }

    pub fn record_unchanged(&mut self, names: impl IntoIterator<Item = String>) {
        self.unchanged.extend(names);
    }

    /// Merge another outcome into this one
    pub fn merge(&mut self, other: &Outcome) {
        self.changed |= other.changed;
        self.created.extend(other.created.iter().cloned());
        self.updated.extend(other.updated.iter().cloned());
        self.deleted.extend(other.deleted.iter().cloned());
        self.attached.extend(other.attached.iter().cloned());
        self.detached.extend(other.detached.iter().cloned());
        self.skipped.extend(other.skipped.iter().cloned());
        self.failed_objects.extend(other.failed_objects.iter().cloned());
        self.unchanged.extend(other.unchanged.iter().cloned());
        self.failed = !self.failed_objects.is_empty();
    }

    /// Deduplicate names and restore the invariants between lists.
    ///
    /// A name that failed anywhere is not also reported as skipped or
    /// unchanged; a name that changed is not also reported as unchanged.
    pub fn finalize(&mut self) {
        for list in [
            &mut self.created,
            &mut self.updated,
            &mut self.deleted,
            &mut self.attached,
            &mut self.detached,
            &mut self.skipped,
            &mut self.failed_objects,
            &mut self.unchanged,
        ] {
            dedup_in_order(list);
        }

        let failed: HashSet<String> = self.failed_objects.iter().cloned().collect();
        self.skipped.retain(|n| !failed.contains(n));

        let settled: HashSet<String> = self
            .created
            .iter()
            .chain(&self.updated)
            .chain(&self.deleted)
            .chain(&self.attached)
            .chain(&self.detached)
            .chain(&self.skipped)
            .chain(&self.failed_objects)
            .cloned()
            .collect();
        self.unchanged.retain(|n| !settled.contains(n));

        self.failed = !self.failed_objects.is_empty();
    }

    /// Every name that was pushed successfully
    pub fn applied(&self) -> Vec<&str> {
        self.created
            .iter()
            .chain(&self.updated)
            .chain(&self.deleted)
            .chain(&self.attached)
            .chain(&self.detached)
            .map(String::as_str)
            .collect()
    }
}

fn dedup_in_order(list: &mut Vec<String>) {
    let mut seen = HashSet::new();
    list.retain(|name| seen.insert(name.clone()));
}

/// Merge outcomes from every phase and target into one
pub fn aggregate<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Outcome {
    let mut total = Outcome::new();
    for outcome in outcomes {
        total.merge(outcome);
    }
    total.finalize();
    total
}

/// Per-target result of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub outcome: Outcome,
    /// Phases that finished for this target, in order
    pub phases_completed: Vec<String>,
    /// Phase in which this target stopped, if it stopped early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<String>,
    /// Fatal error for this target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetReport {
    pub fn is_halted(&self) -> bool {
        self.halted_at.is_some() || self.error.is_some()
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub outcome: Outcome,
    pub targets: BTreeMap<String, TargetReport>,
    /// Nothing was pushed; changes are what would have happened
    pub dry_run: bool,
    /// The operator declined to apply the plan
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub declined: bool,
}

impl Report {
    /// Build a report from per-target reports
    pub fn from_targets(targets: BTreeMap<String, TargetReport>, dry_run: bool) -> Self {
        let outcome = aggregate(targets.values().map(|t| &t.outcome));
        Self {
            outcome,
            targets,
            dry_run,
            declined: false,
        }
    }

    /// Fatal per-target errors as `target: message`
    pub fn errors(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter_map(|(name, t)| t.error.as_ref().map(|e| format!("{name}: {e}")))
            .collect()
    }

    /// The report, or an error when any target failed fatally
    pub fn into_result(self) -> Result<Self> {
        let errors = self.errors();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::TargetsFailed(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_record_applied_sets_changed() {
        let mut outcome = Outcome::new();
        outcome.record_applied(&[
            PatchObject::new("a", ChangeKind::Created),
            PatchObject::new("b", ChangeKind::Detached),
        ]);
        assert!(outcome.changed);
        assert_eq!(outcome.created, names(&["a"]));
        assert_eq!(outcome.detached, names(&["b"]));
    }

    #[test]
    fn test_blocked_sets_failed() {
        let mut outcome = Outcome::new();
        outcome.record_blocked(names(&["svc1"]));
        assert!(outcome.failed);
        assert!(!outcome.changed);
    }

    #[test]
    fn test_aggregate_dedups_and_keeps_disjoint() {
        let mut x = Outcome::new();
        x.record_skipped(names(&["o1", "o2"]));
        x.record_unchanged(names(&["o3"]));
        let mut y = Outcome::new();
        y.record_blocked(names(&["o1"]));
        y.record_skipped(names(&["o2"]));
        y.record_applied(&[PatchObject::new("o3", ChangeKind::Updated)]);

        let total = aggregate([&x, &y]);
        assert_eq!(total.skipped, names(&["o2"]));
        assert_eq!(total.failed_objects, names(&["o1"]));
        assert_eq!(total.updated, names(&["o3"]));
        assert!(total.unchanged.is_empty());
        assert!(total.failed);
        assert!(total.changed);
    }

    #[test]
    fn test_aggregate_empty() {
        let total = aggregate(std::iter::empty());
        assert_eq!(total, Outcome::default());
    }

    #[test]
    fn test_report_errors() {
        let mut targets = BTreeMap::new();
        targets.insert("edge-1".to_string(), TargetReport::default());
        targets.insert(
            "edge-2".to_string(),
            TargetReport {
                error: Some("boom".into()),
                ..Default::default()
            },
        );
        let report = Report::from_targets(targets, false);
        assert_eq!(report.errors(), vec!["edge-2: boom".to_string()]);
        assert!(matches!(
            report.into_result(),
            Err(Error::TargetsFailed(errors)) if errors.len() == 1
        ));
    }
}
