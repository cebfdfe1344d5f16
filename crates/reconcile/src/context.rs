//! Progress and confirmation callbacks
//!
//! These traits keep the engine free of any terminal or UI dependency.

use crate::outcome::Outcome;
use crate::planner::PatchObject;
use crate::types::Target;
use std::io;

/// Progress callback for execution
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called once with every planned update before anything is pushed
    fn on_plan(&mut self, _updates: &[(&Target, &PatchObject)]) {}

    /// Called before a phase starts pushing to `targets` targets
    fn on_phase_start(&mut self, phase: &str, targets: usize);

    /// Called when one target has finished a phase
    fn on_target_complete(&mut self, target: &Target, outcome: &Outcome, error: Option<&str>);

    /// Called when every target has finished a phase
    fn on_phase_complete(&mut self, phase: &str);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> io::Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_phase_start(&mut self, _phase: &str, _targets: usize) {}
    fn on_target_complete(&mut self, _target: &Target, _outcome: &Outcome, _error: Option<&str>) {}
    fn on_phase_complete(&mut self, _phase: &str) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> io::Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> io::Result<bool> {
        Ok(false)
    }
}
