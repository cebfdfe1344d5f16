//! Error types for reconciliation.
//!
//! Push failures are classified into three dispositions: the object is in
//! use (reported as a failed object), the object is gone (reported as
//! skipped), or anything else (fatal for the target). Transports that can
//! tell these apart should construct a typed [`PushError`]; untyped errors
//! fall back to phrase matching on the message, which depends on the exact
//! wording of the remote system.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the reconciliation engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The intent document is malformed or misses a required field
    #[error("invalid configuration: {0}")]
    Load(String),

    /// A target name could not be resolved to a remote id
    #[error("{kind} '{name}' not found")]
    Resolution {
        /// Kind of target, e.g. "device" or "site"
        kind: String,
        /// Name as written in the document
        name: String,
    },

    /// Fetching the current state failed
    #[error("failed to read current state of {target}: {message}")]
    Snapshot {
        /// Target (or scope) whose state was requested
        target: String,
        /// Underlying error
        message: String,
    },

    /// A push failed for a reason other than "in use" or "not found"
    #[error("push to {target} failed in phase '{phase}': {message}")]
    Push {
        /// Target name
        target: String,
        /// Phase that was being applied
        phase: String,
        /// Underlying error message
        message: String,
    },

    /// The worker pool could not be built
    #[error("failed to create worker pool: {0}")]
    ThreadPool(String),

    /// The confirmation prompt failed
    #[error("confirmation prompt failed: {0}")]
    Prompt(#[from] std::io::Error),

    /// The run completed but some targets hit fatal errors
    #[error("{} target(s) failed: {}", .0.len(), .0.join("; "))]
    TargetsFailed(Vec<String>),
}

impl Error {
    /// Build a load error from anything displayable.
    pub fn load(message: impl Into<String>) -> Self {
        Error::Load(message.into())
    }

    /// Whether this error only concerns a single target.
    pub fn is_target_scoped(&self) -> bool {
        matches!(
            self,
            Error::Resolution { .. } | Error::Snapshot { .. } | Error::Push { .. }
        )
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured kind of a push failure, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushErrorKind {
    /// Object is referenced elsewhere and cannot be changed
    InUse,
    /// Object does not exist (anymore)
    NotFound,
    /// The transport could not tell
    Unclassified,
}

/// Error returned by a pusher for one patch document.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PushError {
    pub kind: PushErrorKind,
    pub message: String,
}

impl PushError {
    pub fn new(kind: PushErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn in_use(message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::InUse, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::NotFound, message)
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::Unclassified, message)
    }
}

/// What the engine does with a failed push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Object moves to `failed_objects`, run continues
    Blocked,
    /// Object moves to `skipped`, run continues
    Skipped,
    /// Target aborts
    Fatal,
}

/// Phrases meaning "exists but is referenced".
pub const IN_USE_PHRASES: &[&str] = &[
    "in use",
    "attached",
    "referenced",
    "cannot delete",
    "configured on",
    "numattached",
    "numpolic",
];

/// Phrases meaning "does not exist".
pub const NOT_FOUND_PHRASES: &[&str] = &["not exist", "not found"];

/// Maps push errors to dispositions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    in_use: Vec<String>,
    not_found: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(IN_USE_PHRASES, NOT_FOUND_PHRASES)
    }
}

impl ErrorClassifier {
    /// Create a classifier from two phrase sets (matched case-insensitively).
    pub fn new(in_use: &[&str], not_found: &[&str]) -> Self {
        Self {
            in_use: in_use.iter().map(|p| p.to_lowercase()).collect(),
            not_found: not_found.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Classifier for attach-style phases: "already attached" means nothing to do.
    pub fn attach() -> Self {
        Self::new(&[], &["already attached", "already exists"])
    }

    /// Classifier for detach-style phases: "not attached" means nothing to do.
    pub fn detach() -> Self {
        Self::new(
            &[],
            &["already detached", "not attached", "not found", "not exist"],
        )
    }

    /// Classify a push error.
    ///
    /// Typed kinds win; unclassified messages are matched against the
    /// not-found phrases first, then the in-use phrases.
    pub fn classify(&self, error: &PushError) -> Disposition {
        match error.kind {
            PushErrorKind::InUse => Disposition::Blocked,
            PushErrorKind::NotFound => Disposition::Skipped,
            PushErrorKind::Unclassified => {
                let message = error.message.to_lowercase();
                if self.not_found.iter().any(|p| message.contains(p.as_str())) {
                    Disposition::Skipped
                } else if self.in_use.iter().any(|p| message.contains(p.as_str())) {
                    Disposition::Blocked
                } else {
                    Disposition::Fatal
                }
            }
        }
    }
}
