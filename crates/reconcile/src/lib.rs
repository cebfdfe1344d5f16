//! # Reconcile
//!
//! A reconciliation engine for declarative network configuration.
//!
//! Given desired objects (intent records) and what the remote system reports
//! (state summaries), the engine decides per object whether to create,
//! update, delete or leave it alone, then pushes the resulting patch
//! documents phase by phase, one worker per target.
//!
//! ## Core Concepts
//!
//! - **IntentRecord**: desired state of one named object
//! - **StateSummary**: what the remote reports about one object, including
//!   usage counters
//! - **Partition**: intent records classified into to-apply, skipped,
//!   blocked and unchanged
//! - **Plan**: ordered phases of per-target patch documents; a target only
//!   enters a phase if the previous one went through
//! - **Report**: aggregated outcome, plus a per-target breakdown
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{
//!     partition, stage, work_per_action, any_counter, ExecuteOptions, IntentRecord,
//!     Mode, Normalizer, Phase, PushError, Summary, Target, execute_simple,
//! };
//!
//! let intent = vec![IntentRecord::named("pfx1")];
//! let snapshot = vec![Summary::new("pfx1").with_counter("numAttachedDevices", 0)];
//! let portal = Target::new("portal", "portal");
//!
//! let result = partition(
//!     &intent,
//!     &snapshot,
//!     any_counter(&["numAttachedDevices"]),
//!     Mode::Delete,
//!     &Normalizer::new(),
//! );
//!
//! let mut phase = Phase::new("delete");
//! phase.add(work_per_action(&portal, &result, |a| Some(a.name().to_string())));
//!
//! let pusher = |_: &Target, name: &String| -> Result<(), PushError> {
//!     println!("deleting {name}");
//!     Ok(())
//! };
//! let report = execute_simple(stage([phase])?, &ExecuteOptions::default(), &pusher)?;
//! assert_eq!(report.outcome.deleted, vec!["pfx1"]);
//! ```
//!
//! ## Provider Traits
//!
//! - [`Planner`]: turns a loaded document into a [`Plan`]
//! - [`PatchPusher`]: pushes one patch document to one target
//! - [`ProgressCallback`]: receives progress updates
//! - [`ConfirmCallback`]: handles user confirmation

pub mod context;
pub mod error;
pub mod executor;
pub mod intent;
pub mod normalize;
pub mod outcome;
pub mod partition;
pub mod planner;
pub mod summary;
pub mod types;

// Re-export main types at crate root
pub use context::{AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
pub use error::{
    Disposition, Error, ErrorClassifier, IN_USE_PHRASES, NOT_FOUND_PHRASES, PushError,
    PushErrorKind, Result,
};
pub use executor::{PatchPusher, apply_all, execute, execute_simple};
pub use intent::{Attributes, IntentRecord, records_from_section};
pub use normalize::{Normalizer, subset_eq};
pub use outcome::{Outcome, Report, TargetReport, aggregate};
pub use partition::{Action, NoOpReason, Partition, partition};
pub use planner::{
    Patch, PatchObject, Phase, Plan, TargetFailure, TargetWork, stage, work_combined,
    work_per_action,
};
pub use summary::{StateSummary, Summary, any_counter, counter_from_json, never_in_use};
pub use types::{ChangeKind, ExecuteOptions, Mode, Target, TargetId};

use serde::Serialize;
use serde_json::Value;

/// Builds a plan for one object type and operation
pub trait Planner {
    /// Patch document type pushed to targets
    type Document: Serialize + Sync;

    /// Turn a loaded document into phases of per-target patches.
    ///
    /// Load errors abort the run; target-scoped errors should be recorded
    /// with [`Plan::fail_target`] so other targets continue.
    fn plan(&self, document: &Value) -> Result<Plan<Self::Document>>;
}

/// Run one reconciliation pass.
///
/// Loads the document, plans it and executes the plan. Nothing is pushed if
/// loading or planning fails.
pub fn reconcile<L, P, U, G, C>(
    load: L,
    planner: &P,
    pusher: &U,
    opts: &ExecuteOptions,
    progress: &mut G,
    confirm: &mut C,
) -> Result<Report>
where
    L: FnOnce() -> Result<Value>,
    P: Planner,
    U: PatchPusher<P::Document>,
    G: ProgressCallback,
    C: ConfirmCallback,
{
    let document = load()?;
    let plan = planner.plan(&document)?;
    execute(plan, opts, pusher, progress, confirm)
}
