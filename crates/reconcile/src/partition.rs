//! Partitioner - classifies intent records against a state snapshot

use crate::intent::{Attributes, IntentRecord};
use crate::normalize::Normalizer;
use crate::summary::StateSummary;
use crate::types::Mode;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Why an intent record produced no change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    /// Not present on the remote (delete mode)
    Absent,
    /// Present but referenced elsewhere
    InUse,
    /// Present and already matching
    Unchanged,
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoOpReason::Absent => f.write_str("absent"),
            NoOpReason::InUse => f.write_str("in use"),
            NoOpReason::Unchanged => f.write_str("unchanged"),
        }
    }
}

/// What to do with one intent record
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Object does not exist yet
    Create(IntentRecord),
    /// Object exists and differs from the intent
    Update {
        record: IntentRecord,
        existing: Attributes,
    },
    /// Object exists and is free to remove
    Delete(IntentRecord),
    /// Nothing to do
    NoOp { name: String, reason: NoOpReason },
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::Create(record) | Action::Delete(record) => &record.name,
            Action::Update { record, .. } => &record.name,
            Action::NoOp { name, .. } => name,
        }
    }

    /// Intent record behind the action, if it mutates anything
    pub fn record(&self) -> Option<&IntentRecord> {
        match self {
            Action::Create(record) | Action::Delete(record) => Some(record),
            Action::Update { record, .. } => Some(record),
            Action::NoOp { .. } => None,
        }
    }

    /// Existing attributes, for updates
    pub fn existing(&self) -> Option<&Attributes> {
        match self {
            Action::Update { existing, .. } => Some(existing),
            _ => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Action::NoOp { .. })
    }
}

/// Result of partitioning one object type for one target.
///
/// Every intent name lands in exactly one of the four buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    /// Create, update and delete actions
    pub to_apply: Vec<Action>,
    /// Absent on the remote in delete mode
    pub skipped: Vec<String>,
    /// Present but in use
    pub blocked: Vec<String>,
    /// Present and already matching (create mode only)
    pub unchanged: Vec<String>,
}

impl Partition {
    pub fn is_empty(&self) -> bool {
        self.to_apply.is_empty()
    }

    /// Names of the actions that will be applied
    pub fn apply_names(&self) -> Vec<&str> {
        self.to_apply.iter().map(Action::name).collect()
    }

    /// Every intent name in this partition, in bucket order
    pub fn names(&self) -> Vec<&str> {
        self.to_apply
            .iter()
            .map(Action::name)
            .chain(self.skipped.iter().map(String::as_str))
            .chain(self.blocked.iter().map(String::as_str))
            .chain(self.unchanged.iter().map(String::as_str))
            .collect()
    }

    /// All actions, including a `NoOp` for every name that produces no change
    pub fn into_actions(self) -> Vec<Action> {
        let noop = |reason: NoOpReason| move |name: String| Action::NoOp { name, reason };
        self.to_apply
            .into_iter()
            .chain(self.skipped.into_iter().map(noop(NoOpReason::Absent)))
            .chain(self.blocked.into_iter().map(noop(NoOpReason::InUse)))
            .chain(self.unchanged.into_iter().map(noop(NoOpReason::Unchanged)))
            .collect()
    }
}

/// Partition intent records against a snapshot.
///
/// Snapshot entries are indexed by exact name; when two entries share a name
/// the later one wins. Objects the usage predicate reports as in use are
/// blocked in both modes. In create mode, an existing object is only updated
/// when the normalized intent is not a subset of its normalized attributes;
/// summaries without attributes compare as empty.
pub fn partition<S, F>(
    intent: &[IntentRecord],
    snapshot: &[S],
    in_use: F,
    mode: Mode,
    normalizer: &Normalizer,
) -> Partition
where
    S: StateSummary,
    F: Fn(&S) -> bool,
{
    let by_name: HashMap<&str, &S> = snapshot.iter().map(|s| (s.name(), s)).collect();
    let empty = Attributes::new();
    let mut result = Partition::default();

    for record in intent {
        let Some(summary) = by_name.get(record.name.as_str()).copied() else {
            match mode {
                Mode::Delete => {
                    log::debug!("'{}' not present, nothing to delete", record.name);
                    result.skipped.push(record.name.clone());
                }
                Mode::Create => result.to_apply.push(Action::Create(record.clone())),
            }
            continue;
        };

        if in_use(summary) {
            log::debug!("'{}' is in use, refusing to {mode} it", record.name);
            result.blocked.push(record.name.clone());
            continue;
        }

        match mode {
            Mode::Delete => result.to_apply.push(Action::Delete(record.clone())),
            Mode::Create => {
                let existing = summary.attributes().unwrap_or(&empty);
                if normalizer.matches(&record.attributes, existing) {
                    result.unchanged.push(record.name.clone());
                } else {
                    log::debug!(
                        "'{}' differs in {:?}",
                        record.name,
                        normalizer.changed_keys(&record.attributes, existing)
                    );
                    result.to_apply.push(Action::Update {
                        record: record.clone(),
                        existing: existing.clone(),
                    });
                }
            }
        }
    }

    log::info!(
        "Partition ({mode}): to_apply={:?}, skipped={:?}, blocked={:?}",
        result.apply_names(),
        result.skipped,
        result.blocked
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::{Summary, any_counter, never_in_use};
    use serde_json::json;

    fn record(value: serde_json::Value) -> IntentRecord {
        IntentRecord::from_value(&value, "name").unwrap()
    }

    #[test]
    fn test_delete_absent_is_skipped() {
        let intent = vec![record(json!({"name": "pfx1"}))];
        let snapshot: Vec<Summary> = Vec::new();
        let result = partition(
            &intent,
            &snapshot,
            never_in_use,
            Mode::Delete,
            &Normalizer::new(),
        );
        assert_eq!(result.skipped, vec!["pfx1"]);
        assert!(result.to_apply.is_empty());
        assert!(result.blocked.is_empty());
    }

    #[test]
    fn test_delete_in_use_is_blocked() {
        let intent = vec![record(json!({"name": "svc1"}))];
        let snapshot = vec![Summary::new("svc1").with_counter("attached", 2)];
        let result = partition(
            &intent,
            &snapshot,
            any_counter::<Summary>(&["attached"]),
            Mode::Delete,
            &Normalizer::new(),
        );
        assert_eq!(result.blocked, vec!["svc1"]);
        assert!(result.to_apply.is_empty());
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_delete_free_object() {
        let intent = vec![record(json!({"name": "svc1"}))];
        let snapshot = vec![Summary::new("svc1").with_counter("attached", 0)];
        let result = partition(
            &intent,
            &snapshot,
            any_counter::<Summary>(&["attached"]),
            Mode::Delete,
            &Normalizer::new(),
        );
        assert_eq!(result.apply_names(), vec!["svc1"]);
        assert!(matches!(result.to_apply[0], Action::Delete(_)));
    }

    #[test]
    fn test_create_absent() {
        let intent = vec![record(json!({"name": "ntp1", "domains": ["a"]}))];
        let snapshot: Vec<Summary> = Vec::new();
        let result = partition(
            &intent,
            &snapshot,
            never_in_use,
            Mode::Create,
            &Normalizer::new(),
        );
        assert!(matches!(result.to_apply[0], Action::Create(_)));
    }

    #[test]
    fn test_create_matching_is_unchanged() {
        let intent = vec![record(json!({"name": "ntp1", "domains": ["b", "a"]}))];
        let snapshot = vec![Summary::new("ntp1").with_raw(json!({
            "name": "ntp1",
            "domains": ["a", "b"],
            "id": 12
        }))];
        let result = partition(
            &intent,
            &snapshot,
            never_in_use,
            Mode::Create,
            &Normalizer::new(),
        );
        assert!(result.to_apply.is_empty());
        assert_eq!(result.unchanged, vec!["ntp1"]);
    }

    #[test]
    fn test_create_differing_is_update() {
        let intent = vec![record(json!({"name": "ntp1", "domains": ["c"]}))];
        let snapshot = vec![Summary::new("ntp1").with_raw(json!({"domains": ["a"]}))];
        let result = partition(
            &intent,
            &snapshot,
            never_in_use,
            Mode::Create,
            &Normalizer::new(),
        );
        match &result.to_apply[0] {
            Action::Update { record, existing } => {
                assert_eq!(record.name, "ntp1");
                assert_eq!(existing.get("domains"), Some(&json!(["a"])));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_create_in_use_is_blocked() {
        let intent = vec![record(json!({"name": "p1", "x": 1}))];
        let snapshot = vec![Summary::new("p1").with_counter("numPolicies", 1)];
        let result = partition(
            &intent,
            &snapshot,
            any_counter::<Summary>(&["numAttachedDevices", "numPolicies"]),
            Mode::Create,
            &Normalizer::new(),
        );
        assert_eq!(result.blocked, vec!["p1"]);
    }

    #[test]
    fn test_later_summary_wins() {
        let intent = vec![record(json!({"name": "dup"}))];
        let snapshot = vec![
            Summary::new("dup").with_counter("attached", 3),
            Summary::new("dup"),
        ];
        let result = partition(
            &intent,
            &snapshot,
            any_counter::<Summary>(&["attached"]),
            Mode::Delete,
            &Normalizer::new(),
        );
        assert_eq!(result.apply_names(), vec!["dup"]);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let intent = vec![record(json!({"name": "Svc"}))];
        let snapshot = vec![Summary::new("svc")];
        let result = partition(
            &intent,
            &snapshot,
            never_in_use,
            Mode::Delete,
            &Normalizer::new(),
        );
        assert_eq!(result.skipped, vec!["Svc"]);
    }

    #[test]
    fn test_every_name_accounted_once() {
        let intent = vec![
            record(json!({"name": "a"})),
            record(json!({"name": "b", "v": 1})),
            record(json!({"name": "c", "v": 2})),
            record(json!({"name": "d"})),
        ];
        let snapshot = vec![
            Summary::new("b").with_raw(json!({"v": 1})),
            Summary::new("c").with_raw(json!({"v": 3})),
            Summary::new("d").with_counter("refs", 1),
        ];
        for mode in [Mode::Create, Mode::Delete] {
            let result = partition(
                &intent,
                &snapshot,
                any_counter::<Summary>(&["refs"]),
                mode,
                &Normalizer::new(),
            );
            let mut names = result.names();
            names.sort_unstable();
            assert_eq!(names, vec!["a", "b", "c", "d"], "mode {mode}");

            let actions = result.into_actions();
            assert_eq!(actions.len(), 4);
        }
    }
}
