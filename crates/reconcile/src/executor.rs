//! Execution engine - applies a plan phase by phase, targets in parallel

use crate::context::{ConfirmCallback, ProgressCallback};
use crate::error::{Disposition, Error, PushError, Result};
use crate::outcome::{Outcome, Report, TargetReport};
use crate::planner::{Phase, Plan, TargetWork};
use crate::types::{ExecuteOptions, Target, TargetId};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Pushes one patch document to one target
///
/// Implementations should return a typed [`PushError`] kind when the
/// transport can tell "in use" and "not found" apart from other failures.
pub trait PatchPusher<D>: Sync {
    fn push(&self, target: &Target, document: &D) -> std::result::Result<(), PushError>;
}

impl<D, F> PatchPusher<D> for F
where
    F: Fn(&Target, &D) -> std::result::Result<(), PushError> + Sync,
{
    fn push(&self, target: &Target, document: &D) -> std::result::Result<(), PushError> {
        self(target, document)
    }
}

/// Apply `apply` to every target's document on a bounded worker pool.
///
/// One task per target; a failing task never affects the others. Every
/// result is collected before returning. An empty map issues no calls.
pub fn apply_all<D, R, F>(
    patches: &BTreeMap<TargetId, D>,
    jobs: usize,
    apply: F,
) -> Result<BTreeMap<TargetId, R>>
where
    D: Sync,
    R: Send,
    F: Fn(&TargetId, &D) -> R + Sync,
{
    if patches.is_empty() {
        return Ok(BTreeMap::new());
    }

    if jobs <= 1 || patches.len() == 1 {
        return Ok(patches
            .iter()
            .map(|(id, document)| (id.clone(), apply(id, document)))
            .collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.min(patches.len()))
        .build()
        .map_err(|e| Error::ThreadPool(e.to_string()))?;

    Ok(pool.install(|| {
        patches
            .par_iter()
            .map(|(id, document)| (id.clone(), apply(id, document)))
            .collect()
    }))
}

/// How a target left a phase
#[derive(Debug, Clone, PartialEq, Eq)]
enum PhaseStatus {
    Completed,
    /// A push was rejected as in use; later phases are not attempted
    Blocked,
    /// Unclassified push failure
    Fatal(String),
}

#[derive(Debug)]
struct PhaseResult {
    outcome: Outcome,
    status: PhaseStatus,
}

/// Execute a plan with the given options and callbacks
///
/// Phases run strictly in order. Within a phase every target that is still
/// live runs on the worker pool; its patches are pushed in order. A target
/// whose push is blocked or fails fatally does not enter later phases.
///
/// # Returns
/// The aggregated report. Fatal per-target errors are recorded in the report
/// rather than returned; use [`Report::into_result`] to turn them into an
/// error.
pub fn execute<D, U, P, C>(
    plan: Plan<D>,
    opts: &ExecuteOptions,
    pusher: &U,
    progress: &mut P,
    confirm: &mut C,
) -> Result<Report>
where
    D: Serialize + Sync,
    U: PatchPusher<D>,
    P: ProgressCallback,
    C: ConfirmCallback,
{
    let mut reports: BTreeMap<String, TargetReport> = BTreeMap::new();
    for failure in &plan.failures {
        reports.entry(failure.target.clone()).or_default().error = Some(failure.error.to_string());
    }

    progress.on_plan(&plan.updates());

    let total = plan.patch_count();
    if total > 0 && !opts.dry_run {
        let targets: HashSet<&TargetId> = plan
            .phases
            .iter()
            .flat_map(|p| &p.work)
            .filter(|w| w.has_patches())
            .map(|w| &w.target.id)
            .collect();
        let prompt = format!("Push {total} change(s) to {} target(s)?", targets.len());
        if !confirm.confirm(&prompt)? {
            log::warn!("Declined, nothing pushed");
            let mut report = Report::from_targets(reports, opts.dry_run);
            report.declined = true;
            return Ok(report);
        }
    }

    let mut halted: HashSet<TargetId> = HashSet::new();

    for phase in &plan.phases {
        let live: BTreeMap<TargetId, &TargetWork<D>> = phase
            .work
            .iter()
            .filter(|w| {
                let live = !halted.contains(&w.target.id);
                if !live {
                    log::info!("{}: skipping phase '{}'", w.target, phase.name);
                }
                live
            })
            .map(|w| (w.target.id.clone(), w))
            .collect();

        log::info!(
            "Phase '{}': {} patch(es) for {} target(s)",
            phase.name,
            live.values().map(|w| w.patches.len()).sum::<usize>(),
            live.len()
        );
        progress.on_phase_start(&phase.name, live.len());

        let results = apply_all(&live, opts.jobs, |_, work| {
            run_target(work, phase, pusher, opts.dry_run)
        })?;

        for (id, result) in results {
            let Some(work) = live.get(&id) else {
                continue;
            };
            let report = reports.entry(work.target.name.clone()).or_default();
            report.outcome.merge(&result.outcome);

            let error = match result.status {
                PhaseStatus::Completed => {
                    report.phases_completed.push(phase.name.clone());
                    None
                }
                PhaseStatus::Blocked => {
                    report.halted_at = Some(phase.name.clone());
                    halted.insert(id);
                    None
                }
                PhaseStatus::Fatal(message) => {
                    report.halted_at = Some(phase.name.clone());
                    report.error = Some(message);
                    halted.insert(id);
                    report.error.as_deref()
                }
            };
            progress.on_target_complete(&work.target, &result.outcome, error);
        }

        progress.on_phase_complete(&phase.name);
    }

    for report in reports.values_mut() {
        report.outcome.finalize();
    }
    let report = Report::from_targets(reports, opts.dry_run);
    let outcome = &report.outcome;
    log::info!(
        "Completed: changed={}, created={:?}, updated={:?}, deleted={:?}, skipped={:?}, \
         failed_objects={:?}",
        outcome.changed,
        outcome.created,
        outcome.updated,
        outcome.deleted,
        outcome.skipped,
        outcome.failed_objects
    );

    Ok(report)
}

/// Push one target's patches for one phase, in order
fn run_target<D, U>(
    work: &TargetWork<D>,
    phase: &Phase<D>,
    pusher: &U,
    dry_run: bool,
) -> PhaseResult
where
    D: Serialize,
    U: PatchPusher<D>,
{
    let mut outcome = Outcome::new();
    outcome.record_skipped(work.skipped.iter().cloned());
    outcome.record_blocked(work.blocked.iter().cloned());
    outcome.record_unchanged(work.unchanged.iter().cloned());
    let mut status = PhaseStatus::Completed;

    for patch in &work.patches {
        if dry_run {
            let document = serde_json::to_string(&patch.document)
                .unwrap_or_else(|e| format!("<unserializable: {e}>"));
            log::info!(
                "[check_mode] {} / {}: {:?} -> {document}",
                work.target,
                phase.name,
                patch.names()
            );
            outcome.record_applied(&patch.objects);
            continue;
        }

        match pusher.push(&work.target, &patch.document) {
            Ok(()) => {
                log::info!("{} / {}: pushed {:?}", work.target, phase.name, patch.names());
                outcome.record_applied(&patch.objects);
            }
            Err(err) => match phase.classifier.classify(&err) {
                Disposition::Blocked => {
                    log::warn!("{}: {:?} in use: {err}", work.target, patch.names());
                    outcome.record_blocked(patch.names());
                    status = PhaseStatus::Blocked;
                }
                Disposition::Skipped => {
                    log::info!("{}: {:?} already gone: {err}", work.target, patch.names());
                    outcome.record_skipped(patch.names());
                }
                Disposition::Fatal => {
                    let error = Error::Push {
                        target: work.target.to_string(),
                        phase: phase.name.clone(),
                        message: err.message,
                    };
                    log::error!("{error}");
                    return PhaseResult {
                        outcome,
                        status: PhaseStatus::Fatal(error.to_string()),
                    };
                }
            },
        }
    }

    PhaseResult { outcome, status }
}

/// Simple execution without callbacks
///
/// For basic use cases where you don't need progress or confirmation.
pub fn execute_simple<D, U>(plan: Plan<D>, opts: &ExecuteOptions, pusher: &U) -> Result<Report>
where
    D: Serialize + Sync,
    U: PatchPusher<D>,
{
    use crate::context::{AutoConfirm, NoProgress};

    execute(plan, opts, pusher, &mut NoProgress, &mut AutoConfirm)
}
