//! End-to-end runs of the engine against an in-memory remote

use reconcile::{
    AutoConfirm, ChangeKind, ErrorClassifier, ExecuteOptions, IntentRecord, Mode, NoProgress,
    Normalizer, Patch, PatchObject, Phase, Plan, Planner, PushError, Result, Summary, Target,
    TargetWork, any_counter, execute_simple, never_in_use, partition, reconcile,
    records_from_section, stage, work_combined, work_per_action,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// What a fake portal stores: object name -> attributes, plus usage counts
#[derive(Default)]
struct FakeRemote {
    objects: Mutex<BTreeMap<String, Value>>,
    usage: BTreeMap<String, u64>,
    pushes: Mutex<usize>,
}

#[derive(Debug, Clone, Serialize)]
enum Op {
    Put(String, Value),
    Delete(String),
}

impl FakeRemote {
    fn snapshot(&self) -> Vec<Summary> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(name, raw)| {
                Summary::new(name.clone())
                    .with_counter("attached", self.usage.get(name).copied().unwrap_or(0))
                    .with_raw(raw.clone())
            })
            .collect()
    }

    fn apply(&self, op: &Op) -> std::result::Result<(), PushError> {
        *self.pushes.lock().unwrap() += 1;
        let mut objects = self.objects.lock().unwrap();
        match op {
            Op::Put(name, value) => {
                objects.insert(name.clone(), value.clone());
                Ok(())
            }
            Op::Delete(name) => {
                if self.usage.get(name).copied().unwrap_or(0) > 0 {
                    return Err(PushError::unclassified(format!(
                        "object {name} is in use by 2 devices"
                    )));
                }
                objects
                    .remove(name)
                    .map(|_| ())
                    .ok_or_else(|| PushError::unclassified(format!("{name} not found")))
            }
        }
    }

    fn push_count(&self) -> usize {
        *self.pushes.lock().unwrap()
    }
}

struct ObjectPlanner<'a> {
    remote: &'a FakeRemote,
    mode: Mode,
}

impl Planner for ObjectPlanner<'_> {
    type Document = Op;

    fn plan(&self, document: &Value) -> Result<Plan<Op>> {
        let intent = records_from_section(&document["objects"], "name")?;
        let snapshot = self.remote.snapshot();
        let result = partition(
            &intent,
            &snapshot,
            any_counter::<Summary>(&["attached"]),
            self.mode,
            &Normalizer::new(),
        );
        let portal = Target::new("portal", "portal");
        let mut phase = Phase::new(self.mode.to_string());
        phase.add(work_per_action(&portal, &result, |action| {
            let record = action.record()?;
            Some(match self.mode {
                Mode::Create => Op::Put(
                    record.name.clone(),
                    Value::Object(record.attributes.clone()),
                ),
                Mode::Delete => Op::Delete(record.name.clone()),
            })
        }));
        stage([phase])
    }
}

fn run(remote: &FakeRemote, mode: Mode, document: Value) -> reconcile::Report {
    let planner = ObjectPlanner { remote, mode };
    let pusher = |_: &Target, op: &Op| remote.apply(op);
    reconcile(
        || Ok(document),
        &planner,
        &pusher,
        &ExecuteOptions::default(),
        &mut NoProgress,
        &mut AutoConfirm,
    )
    .unwrap()
}

#[test]
fn delete_absent_object_is_skipped() {
    let remote = FakeRemote::default();
    let report = run(&remote, Mode::Delete, json!({"objects": [{"name": "pfx1"}]}));

    assert_eq!(report.outcome.skipped, vec!["pfx1"]);
    assert!(!report.outcome.changed);
    assert!(!report.outcome.failed);
    assert_eq!(remote.push_count(), 0);
}

#[test]
fn delete_in_use_object_fails_without_push() {
    let remote = FakeRemote::default();
    remote
        .objects
        .lock()
        .unwrap()
        .insert("svc1".into(), json!({}));
    let remote = FakeRemote {
        usage: BTreeMap::from([("svc1".to_string(), 2)]),
        ..remote
    };

    let report = run(&remote, Mode::Delete, json!({"objects": ["svc1"]}));

    assert!(report.outcome.failed);
    assert_eq!(report.outcome.failed_objects, vec!["svc1"]);
    assert!(report.outcome.deleted.is_empty());
    assert_eq!(remote.push_count(), 0);
}

#[test]
fn second_run_is_idempotent() {
    let remote = FakeRemote::default();
    let document = json!({"objects": [
        {"name": "ntp-a", "domains": ["b.example", "a.example"]},
        {"name": "ntp-b", "domains": ["c.example"]}
    ]});

    let first = run(&remote, Mode::Create, document.clone());
    assert!(first.outcome.changed);
    assert_eq!(first.outcome.created, vec!["ntp-a", "ntp-b"]);
    let pushes = remote.push_count();

    let second = run(&remote, Mode::Create, document);
    assert!(!second.outcome.changed);
    assert_eq!(second.outcome.unchanged, vec!["ntp-a", "ntp-b"]);
    assert_eq!(second.outcome.failed_objects, first.outcome.failed_objects);
    assert_eq!(remote.push_count(), pushes);
}

#[test]
fn delete_then_delete_again() {
    let remote = FakeRemote::default();
    remote
        .objects
        .lock()
        .unwrap()
        .insert("vpn1".into(), json!({"ike": "v2"}));

    let first = run(&remote, Mode::Delete, json!({"objects": ["vpn1"]}));
    assert_eq!(first.outcome.deleted, vec!["vpn1"]);

    let second = run(&remote, Mode::Delete, json!({"objects": ["vpn1"]}));
    assert!(!second.outcome.changed);
    assert_eq!(second.outcome.skipped, vec!["vpn1"]);
}

#[test]
fn load_error_aborts_before_any_push() {
    let remote = FakeRemote::default();
    let planner = ObjectPlanner {
        remote: &remote,
        mode: Mode::Create,
    };
    let pusher = |_: &Target, op: &Op| remote.apply(op);
    let result = reconcile(
        || Ok(json!({"objects": [{"domains": ["x"]}]})),
        &planner,
        &pusher,
        &ExecuteOptions::default(),
        &mut NoProgress,
        &mut AutoConfirm,
    );
    assert!(matches!(result, Err(reconcile::Error::Load(_))));
    assert_eq!(remote.push_count(), 0);
}

#[test]
fn subset_round_trip_is_no_action() {
    let created = IntentRecord::from_value(
        &json!({
            "name": "default",
            "prefix": "0.0.0.0/0",
            "administrativeDistance": 5,
            "nextHops": [
                {"nextHopAddress": "10.0.0.1"},
                {"outgoingInterface": "ge-0/0/1"}
            ]
        }),
        "name",
    )
    .unwrap();
    let reported = Summary::new("default").with_raw(json!({
        "prefix": "0.0.0.0/0",
        "administrativeDistance": {"distance": "5"},
        "nextHops": [
            {"outgoingInterface": "ge-0/0/1"},
            {"nextHopAddress": "10.0.0.1"}
        ],
        "tag": 0
    }));
    let normalizer = Normalizer::new()
        .unwrap("administrativeDistance", "distance")
        .stringify("administrativeDistance");

    let result = partition(
        &[created],
        &[reported],
        never_in_use,
        Mode::Create,
        &normalizer,
    );
    assert!(result.to_apply.is_empty());
    assert_eq!(result.unchanged, vec!["default"]);
}

#[test]
fn partition_buckets_are_complete_and_disjoint() {
    let intent: Vec<IntentRecord> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(IntentRecord::named)
        .collect();
    let snapshot = vec![
        Summary::new("b").with_counter("refs", 1),
        Summary::new("c"),
        Summary::new("e").with_counter("refs", 4),
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
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert!(result.skipped.iter().all(|n| !result.blocked.contains(n)));
    }
}

fn device_work(id: i64, name: &str, objects: &[&str]) -> TargetWork<String> {
    let mut work = TargetWork::new(Target::new(id, name));
    for object in objects {
        work.push(
            Patch::new(format!("{name}/{object}"))
                .with_object(PatchObject::new(*object, ChangeKind::Deleted)),
        );
    }
    work
}

#[test]
fn failed_phase_gates_later_phases_per_target() {
    let mut routes = Phase::new("routes");
    routes.add(device_work(1, "edge-x", &["o1"]));
    routes.add(device_work(2, "edge-y", &["r2"]));
    let mut interfaces = Phase::new("interfaces");
    interfaces.add(device_work(1, "edge-x", &["ge-0/0/1"]));
    interfaces.add(device_work(2, "edge-y", &["ge-0/0/2"]));
    let plan = stage([routes, interfaces]).unwrap();

    let pushed = Mutex::new(Vec::new());
    let pusher = |_: &Target, doc: &String| {
        pushed.lock().unwrap().push(doc.clone());
        if doc == "edge-x/o1" {
            Err(PushError::in_use("o1 is referenced by a policy"))
        } else {
            Ok(())
        }
    };
    let report = execute_simple(plan, &ExecuteOptions::default(), &pusher).unwrap();

    let pushed = pushed.into_inner().unwrap();
    assert!(!pushed.contains(&"edge-x/ge-0/0/1".to_string()));
    assert!(pushed.contains(&"edge-y/ge-0/0/2".to_string()));

    let x = &report.targets["edge-x"];
    assert_eq!(x.outcome.failed_objects, vec!["o1"]);
    assert_eq!(x.halted_at.as_deref(), Some("routes"));
    assert!(x.error.is_none());

    let y = &report.targets["edge-y"];
    assert_eq!(y.outcome.deleted, vec!["r2", "ge-0/0/2"]);
    assert_eq!(y.phases_completed, vec!["routes", "interfaces"]);

    assert!(report.outcome.failed);
    assert!(report.into_result().is_ok());
}

#[test]
fn in_use_on_one_target_leaves_other_target_alone() {
    let mut first = Phase::new("detach");
    first.add(device_work(1, "edge-x", &["o1"]));
    let mut y = TargetWork::new(Target::new(2, "edge-y"));
    y.unchanged.push("o2".into());
    first.add(y);
    let mut second = Phase::new("delete");
    second.add(device_work(1, "edge-x", &["o1"]));
    second.add(device_work(2, "edge-y", &["o3"]));
    let plan = stage([first, second]).unwrap();

    let pusher = |_: &Target, doc: &String| {
        if doc.starts_with("edge-x") {
            Err(PushError::unclassified("Cannot delete: object is attached"))
        } else {
            Ok(())
        }
    };
    let report = execute_simple(plan, &ExecuteOptions::default(), &pusher).unwrap();

    assert_eq!(report.targets["edge-x"].outcome.failed_objects, vec!["o1"]);
    assert!(report.targets["edge-x"].outcome.deleted.is_empty());
    let y = &report.targets["edge-y"].outcome;
    assert!(y.changed);
    assert_eq!(y.deleted, vec!["o3"]);
    assert_eq!(y.unchanged, vec!["o2"]);
}

#[test]
fn phase_classifier_treats_already_attached_as_skip() {
    let mut attach = Phase::new("attach").with_classifier(ErrorClassifier::attach());
    attach.add(device_work(5, "site-a", &["snmp-1"]));
    let plan = stage([attach]).unwrap();

    let pusher = |_: &Target, _: &String| -> std::result::Result<(), PushError> {
        Err(PushError::unclassified("SNMP already attached"))
    };
    let report = execute_simple(plan, &ExecuteOptions::default(), &pusher).unwrap();

    assert_eq!(report.outcome.skipped, vec!["snmp-1"]);
    assert!(!report.outcome.failed);
    assert!(report.errors().is_empty());
}

#[test]
fn combined_patch_reports_every_object() {
    let intent = vec![
        IntentRecord::from_value(&json!({"name": "n1", "domains": ["a"]}), "name").unwrap(),
        IntentRecord::from_value(&json!({"name": "n2", "domains": ["b"]}), "name").unwrap(),
    ];
    let snapshot = vec![Summary::new("n2").with_raw(json!({"domains": ["b"]}))];
    let result = partition(
        &intent,
        &snapshot,
        never_in_use,
        Mode::Create,
        &Normalizer::new(),
    );
    let device = Target::new(42, "edge-42");
    let mut phase = Phase::new("configure");
    phase.add(work_combined(&device, &result, json!({"ntp": {"n1": {}}})));
    let plan = stage([phase]).unwrap();

    let pushes = Mutex::new(0);
    let pusher = |_: &Target, _: &Value| -> std::result::Result<(), PushError> {
        *pushes.lock().unwrap() += 1;
        Ok(())
    };
    let report = execute_simple(plan, &ExecuteOptions::default(), &pusher).unwrap();
    assert_eq!(*pushes.lock().unwrap(), 1);
    assert_eq!(report.outcome.created, vec!["n1"]);
    assert_eq!(report.outcome.unchanged, vec!["n2"]);
}

#[test]
fn planning_failure_is_reported_per_target() {
    let mut plan: Plan<String> = Plan::new();
    plan.fail_target(
        "edge-missing",
        reconcile::Error::Resolution {
            kind: "device".into(),
            name: "edge-missing".into(),
        },
    );
    let mut phase = Phase::new("configure");
    phase.add(device_work(1, "edge-1", &["a"]));
    plan.phases.push(phase);

    let pusher = |_: &Target, _: &String| -> std::result::Result<(), PushError> { Ok(()) };
    let report = execute_simple(plan, &ExecuteOptions::default(), &pusher).unwrap();
    assert_eq!(report.outcome.deleted, vec!["a"]);
    assert_eq!(
        report.targets["edge-missing"].error.as_deref(),
        Some("device 'edge-missing' not found")
    );
    assert!(report.into_result().is_err());
}
