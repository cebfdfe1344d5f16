//! Error types for portal operations.
//!
//! Every error carries an [`ErrorCategory`] so callers can tell an object
//! that is still referenced elsewhere from one that is already gone, without
//! parsing messages themselves. The category is derived from the HTTP status
//! first and from the portal's message text second.

use std::fmt;

/// Result type alias for portal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of portal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The object is referenced by something else and cannot be changed.
    InUse,
    /// The object (or the target holding it) does not exist.
    NotFound,
    /// Credentials were rejected or the session expired.
    Auth,
    /// Network-related errors (transient, retryable).
    Network,
    /// Other/unknown errors.
    Other,
}

/// Phrases in portal messages meaning "still referenced".
const IN_USE_MARKERS: &[&str] = &["in use", "is referenced", "still attached"];

/// Phrases in portal messages meaning "does not exist".
const NOT_FOUND_MARKERS: &[&str] = &["not found", "does not exist"];

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::InUse => "Object is in use",
            Self::NotFound => "Object not found",
            Self::Auth => "Authentication failed",
            Self::Network => "Network connectivity issue",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::InUse => "Detach the object from its devices, sites or policies first",
            Self::NotFound => "Verify the object or device name is correct",
            Self::Auth => "Check GRAPHIANT_USERNAME and GRAPHIANT_PASSWORD",
            Self::Network => "Check the portal host and your connection, then try again",
            Self::Other => "Check the error details for more information",
        }
    }

    /// Derive a category from an HTTP status and the portal's message.
    #[must_use]
    pub fn from_response(status: Option<u16>, message: &str) -> Self {
        match status {
            Some(401 | 403) => return Self::Auth,
            Some(404) => return Self::NotFound,
            Some(409 | 423) => return Self::InUse,
            _ => {}
        }
        let message = message.to_lowercase();
        if IN_USE_MARKERS.iter().any(|m| message.contains(m)) {
            Self::InUse
        } else if NOT_FOUND_MARKERS.iter().any(|m| message.contains(m)) {
            Self::NotFound
        } else if status.is_none() {
            Self::Network
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while talking to the portal.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The portal answered with an error status.
    #[error("{method} {path} failed ({status}): {message}")]
    Api {
        /// HTTP method.
        method: String,
        /// Request path.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {message}")]
    HttpError {
        /// Error message.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// Login was rejected or returned no token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Invalid response from API.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// A named device, site or object does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of object, e.g. "device".
        kind: String,
        /// Name that was looked up.
        name: String,
    },
}

impl Error {
    /// Create an HTTP error.
    pub fn http(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::HttpError {
            message: message.into(),
            status,
        }
    }

    /// Create an API error from a failed response.
    pub fn api(
        method: impl Into<String>,
        path: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::Api {
            method: method.into(),
            path: path.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a not-found error for a named object.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Get the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Api {
                status, message, ..
            } => ErrorCategory::from_response(Some(*status), message),
            Error::HttpError { message, status } => ErrorCategory::from_response(*status, message),
            Error::Auth(_) => ErrorCategory::Auth,
            Error::InvalidResponse(_) => ErrorCategory::Other,
            Error::NotFound { .. } => ErrorCategory::NotFound,
        }
    }

    /// The portal's own message, without request context.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Error::Api { message, .. } | Error::HttpError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::HttpError {
                message: format!("HTTP {code}"),
                status: Some(code),
            },
            other => Self::HttpError {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
