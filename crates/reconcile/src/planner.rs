//! Dependency stager - orders phases and holds per-target patch documents
//!
//! A plan is a list of phases applied strictly in order. Each phase holds,
//! per target, the patch documents to push and the names the partitioner
//! already settled (skipped, blocked, unchanged). A target stops after a
//! phase in which a push was rejected as in use or failed fatally. Names the
//! partitioner blocked are only reported and never stop a target.

use crate::error::{Error, ErrorClassifier};
use crate::partition::{Action, Partition};
use crate::types::{ChangeKind, Target, TargetId};
use serde::Serialize;
use serde_json::Value;

/// One object touched by a patch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchObject {
    pub name: String,
    pub change: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

impl PatchObject {
    pub fn new(name: impl Into<String>, change: ChangeKind) -> Self {
        Self {
            name: name.into(),
            change,
            before: None,
            after: None,
        }
    }

    pub fn with_before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: Value) -> Self {
        self.after = Some(after);
        self
    }

    /// Describe a partition action; `None` for no-ops
    pub fn from_action(action: &Action) -> Option<Self> {
        let object = match action {
            Action::Create(record) => Self::new(&record.name, ChangeKind::Created)
                .with_after(Value::Object(record.attributes.clone())),
            Action::Update { record, existing } => Self::new(&record.name, ChangeKind::Updated)
                .with_before(Value::Object(existing.clone()))
                .with_after(Value::Object(record.attributes.clone())),
            Action::Delete(record) => Self::new(&record.name, ChangeKind::Deleted),
            Action::NoOp { .. } => return None,
        };
        Some(object)
    }
}

/// A patch document for one target plus the objects it touches
#[derive(Debug, Clone, PartialEq)]
pub struct Patch<D> {
    pub objects: Vec<PatchObject>,
    pub document: D,
}

impl<D> Patch<D> {
    pub fn new(document: D) -> Self {
        Self {
            objects: Vec::new(),
            document,
        }
    }

    pub fn with_object(mut self, object: PatchObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn with_objects(mut self, objects: impl IntoIterator<Item = PatchObject>) -> Self {
        self.objects.extend(objects);
        self
    }

    /// Names of the touched objects
    pub fn names(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.name.clone()).collect()
    }
}

/// Everything one phase does to one target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetWork<D> {
    pub target: Target,
    pub patches: Vec<Patch<D>>,
    pub skipped: Vec<String>,
    pub blocked: Vec<String>,
    pub unchanged: Vec<String>,
}

impl<D> TargetWork<D> {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            patches: Vec::new(),
            skipped: Vec::new(),
            blocked: Vec::new(),
            unchanged: Vec::new(),
        }
    }

    /// Record the names a partition settled without a push
    pub fn absorb(&mut self, partition: &Partition) {
        self.skipped.extend(partition.skipped.iter().cloned());
        self.blocked.extend(partition.blocked.iter().cloned());
        self.unchanged.extend(partition.unchanged.iter().cloned());
    }

    /// Queue a patch; empty patches are dropped
    pub fn push(&mut self, patch: Patch<D>) {
        if patch.objects.is_empty() {
            return;
        }
        self.patches.push(patch);
    }

    pub fn has_patches(&self) -> bool {
        !self.patches.is_empty()
    }

    /// Whether this work contributes anything to the outcome
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
            && self.skipped.is_empty()
            && self.blocked.is_empty()
            && self.unchanged.is_empty()
    }
}

/// One ordered step of a plan
#[derive(Debug, Clone)]
pub struct Phase<D> {
    pub name: String,
    pub classifier: ErrorClassifier,
    pub work: Vec<TargetWork<D>>,
}

impl<D> Phase<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classifier: ErrorClassifier::default(),
            work: Vec::new(),
        }
    }

    /// Use a phase-specific error classifier
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Work for a target, created on first use
    pub fn work_for(&mut self, target: &Target) -> &mut TargetWork<D> {
        let index = match self.work.iter().position(|w| w.target.id == target.id) {
            Some(index) => index,
            None => {
                self.work.push(TargetWork::new(target.clone()));
                self.work.len() - 1
            }
        };
        &mut self.work[index]
    }

    /// Add finished work; merges with existing work for the same target
    pub fn add(&mut self, work: TargetWork<D>) {
        if work.is_empty() {
            return;
        }
        let slot = self.work_for(&work.target);
        slot.patches.extend(work.patches);
        slot.skipped.extend(work.skipped);
        slot.blocked.extend(work.blocked);
        slot.unchanged.extend(work.unchanged);
    }

    /// Number of patches across all targets
    pub fn patch_count(&self) -> usize {
        self.work.iter().map(|w| w.patches.len()).sum()
    }

    pub fn target_ids(&self) -> Vec<&TargetId> {
        self.work.iter().map(|w| &w.target.id).collect()
    }
}

/// A target that never made it into the plan
#[derive(Debug)]
pub struct TargetFailure {
    pub target: String,
    pub error: Error,
}

/// Phases in application order plus per-target planning failures
#[derive(Debug)]
pub struct Plan<D> {
    pub phases: Vec<Phase<D>>,
    pub failures: Vec<TargetFailure>,
}

impl<D> Default for Plan<D> {
    fn default() -> Self {
        Self {
            phases: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<D> Plan<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a target-scoped planning error; other targets continue
    pub fn fail_target(&mut self, target: impl Into<String>, error: Error) {
        let target = target.into();
        log::warn!("{target}: {error}");
        self.failures.push(TargetFailure { target, error });
    }

    /// Total patches across all phases
    pub fn patch_count(&self) -> usize {
        self.phases.iter().map(Phase::patch_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.patch_count() == 0
    }

    /// Objects that would be updated, with their before/after attributes
    pub fn updates(&self) -> Vec<(&Target, &PatchObject)> {
        self.phases
            .iter()
            .flat_map(|phase| &phase.work)
            .flat_map(|work| {
                work.patches
                    .iter()
                    .flat_map(|patch| &patch.objects)
                    .filter(|o| o.before.is_some() && o.after.is_some())
                    .map(move |o| (&work.target, o))
            })
            .collect()
    }
}

/// Order phases for execution.
///
/// Phases run in declaration order. Phase names must be unique within a plan
/// since reports refer to phases by name.
pub fn stage<D>(phases: impl IntoIterator<Item = Phase<D>>) -> crate::error::Result<Plan<D>> {
    let mut plan = Plan::new();
    for phase in phases {
        if plan.phases.iter().any(|p: &Phase<D>| p.name == phase.name) {
            return Err(Error::load(format!("phase '{}' declared twice", phase.name)));
        }
        plan.phases.push(phase);
    }
    Ok(plan)
}

/// Convenience for adapters: turn a partition into one phase's work for a
/// target, building one patch per action with `build`.
pub fn work_per_action<D, F>(target: &Target, partition: &Partition, mut build: F) -> TargetWork<D>
where
    F: FnMut(&Action) -> Option<D>,
{
    let mut work = TargetWork::new(target.clone());
    work.absorb(partition);
    for action in &partition.to_apply {
        if let (Some(object), Some(document)) = (PatchObject::from_action(action), build(action)) {
            work.push(Patch::new(document).with_object(object));
        }
    }
    work
}

/// Convenience for adapters: fold every action of a partition into a single
/// patch document for a target. No patch is queued when nothing applies.
pub fn work_combined<D>(target: &Target, partition: &Partition, document: D) -> TargetWork<D> {
    let mut work = TargetWork::new(target.clone());
    work.absorb(partition);
    let objects: Vec<PatchObject> = partition
        .to_apply
        .iter()
        .filter_map(PatchObject::from_action)
        .collect();
    work.push(Patch::new(document).with_objects(objects));
    work
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentRecord;

    fn target(id: i64, name: &str) -> Target {
        Target::new(id, name)
    }

    #[test]
    fn test_stage_keeps_declaration_order() {
        let plan = stage(vec![
            Phase::<()>::new("routes"),
            Phase::new("interfaces"),
        ])
        .unwrap();
        let names: Vec<&str> = plan.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["routes", "interfaces"]);
    }

    #[test]
    fn test_stage_rejects_duplicate_phase() {
        let result = stage(vec![Phase::<()>::new("a"), Phase::new("a")]);
        assert!(matches!(result, Err(Error::Load(_))));
    }

    #[test]
    fn test_empty_patch_dropped() {
        let mut work = TargetWork::new(target(1, "edge-1"));
        work.push(Patch::new("doc"));
        assert!(!work.has_patches());
    }

    #[test]
    fn test_phase_merges_work_per_target() {
        let mut phase = Phase::new("one");
        let t = target(1, "edge-1");

        let mut a = TargetWork::new(t.clone());
        a.skipped.push("x".into());
        let mut b = TargetWork::new(t.clone());
        b.push(Patch::new(1).with_object(PatchObject::new("y", ChangeKind::Created)));

        phase.add(a);
        phase.add(b);
        phase.add(TargetWork::new(target(2, "edge-2")));

        assert_eq!(phase.work.len(), 1);
        assert_eq!(phase.work[0].skipped, vec!["x"]);
        assert_eq!(phase.patch_count(), 1);
    }

    #[test]
    fn test_work_combined_from_partition() {
        let partition = Partition {
            to_apply: vec![
                Action::Create(IntentRecord::named("a")),
                Action::Delete(IntentRecord::named("b")),
            ],
            skipped: vec!["c".into()],
            ..Default::default()
        };
        let work = work_combined(&target(7, "edge-7"), &partition, "payload");
        assert_eq!(work.patches.len(), 1);
        assert_eq!(work.patches[0].names(), vec!["a", "b"]);
        assert_eq!(work.patches[0].objects[1].change, ChangeKind::Deleted);
        assert_eq!(work.skipped, vec!["c"]);
    }

    #[test]
    fn test_work_combined_nothing_to_apply() {
        let partition = Partition {
            unchanged: vec!["a".into()],
            ..Default::default()
        };
        let work = work_combined(&target(7, "edge-7"), &partition, "payload");
        assert!(!work.has_patches());
        assert_eq!(work.unchanged, vec!["a"]);
    }

    #[test]
    fn test_work_per_action() {
        let partition = Partition {
            to_apply: vec![
                Action::Delete(IntentRecord::named("a")),
                Action::Delete(IntentRecord::named("b")),
            ],
            ..Default::default()
        };
        let work = work_per_action(&target(0, "portal"), &partition, |action| {
            Some(action.name().to_uppercase())
        });
        let docs: Vec<&str> = work.patches.iter().map(|p| p.document.as_str()).collect();
        assert_eq!(docs, vec!["A", "B"]);
    }
}
