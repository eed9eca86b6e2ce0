//! Error types for session loading.
//!
//! All errors implement `std::error::Error` and carry enough structured context
//! for the routing layer to pick a response without string matching.
//!
//! ## Error Categories
//!
//! - **Transient**: [`SessionError::DataNotReady`] is raised while the upstream
//!   provider is still populating a category. It is absorbed by the poll loop
//!   and never reaches a caller.
//! - **Terminal**: load timeouts, data the upstream simply does not have, and
//!   provider failures. These cross every boundary unchanged.
//! - **Caller errors**: malformed session keys, rejected before any remote call.
//!
//! ## Retry classification
//!
//! ```rust
//! use paddock::{Category, ErrorKind, SessionError};
//!
//! let error = SessionError::not_ready(Category::Laps);
//! assert!(error.is_retryable());
//! assert_eq!(error.kind(), ErrorKind::DataNotReady);
//!
//! let error = SessionError::invalid_key("round 0 is reserved for testing");
//! assert!(!error.is_retryable());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryExhausted;
use crate::types::Category;

/// Result type alias for session operations.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Main error type for session loading operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    #[error("{category} data is not loaded yet")]
    DataNotReady { category: Category },

    #[error("Loading {operation} timed out after {elapsed:?} ({attempts} attempts)")]
    LoadTimeout { operation: String, elapsed: Duration, attempts: u32 },

    #[error("Upstream has no {what} for this session")]
    UpstreamDataAbsent { what: String },

    #[error("Invalid session key: {reason}")]
    InvalidSessionKey { reason: String },

    #[error("Upstream source error: {reason}")]
    Upstream {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Background load task failed: {reason}")]
    TaskFailed { reason: String },
}

/// Fieldless mirror of [`SessionError`] variants.
///
/// Used wherever a set of error classes has to be named without constructing
/// an error, most notably the ignore list handed to
/// [`poll_ignoring`](crate::retry::poll_ignoring).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DataNotReady,
    LoadTimeout,
    UpstreamDataAbsent,
    InvalidSessionKey,
    Upstream,
    Config,
    TaskFailed,
}

impl SessionError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::DataNotReady { .. } => ErrorKind::DataNotReady,
            SessionError::LoadTimeout { .. } => ErrorKind::LoadTimeout,
            SessionError::UpstreamDataAbsent { .. } => ErrorKind::UpstreamDataAbsent,
            SessionError::InvalidSessionKey { .. } => ErrorKind::InvalidSessionKey,
            SessionError::Upstream { .. } => ErrorKind::Upstream,
            SessionError::Config { .. } => ErrorKind::Config,
            SessionError::TaskFailed { .. } => ErrorKind::TaskFailed,
        }
    }

    /// Returns whether polling again can turn this error into data.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::DataNotReady { .. } => true,
            SessionError::LoadTimeout { .. } => false,
            SessionError::UpstreamDataAbsent { .. } => false,
            SessionError::InvalidSessionKey { .. } => false,
            SessionError::Upstream { .. } => false,
            SessionError::Config { .. } => false,
            SessionError::TaskFailed { .. } => false,
        }
    }

    /// Returns true for errors caused by the request rather than the upstream.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, SessionError::InvalidSessionKey { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SessionError::DataNotReady { .. } => vec![
                "Poll again after a short delay",
                "Issue a load for this category before reading it",
            ],
            SessionError::LoadTimeout { .. } => vec![
                "Increase the timeout for this category",
                "Check that the upstream provider is reachable",
                "Retry the request once the session data has been published",
            ],
            SessionError::UpstreamDataAbsent { .. } => vec![
                "Check that the session actually produced this data",
                "Do not retry, the upstream does not publish it",
            ],
            SessionError::InvalidSessionKey { .. } => vec![
                "Check the year, round and session identifier",
                "Address testing sessions by day number",
            ],
            SessionError::Upstream { .. } => vec![
                "Check upstream provider availability",
                "Verify the requested event exists for that season",
            ],
            SessionError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Ensure poll intervals and timeouts are non-zero",
            ],
            SessionError::TaskFailed { .. } => vec![
                "Inspect logs for a panic inside the load task",
                "Retry the request",
            ],
        }
    }

    /// Helper constructor for the transient not-ready signal.
    pub fn not_ready(category: Category) -> Self {
        SessionError::DataNotReady { category }
    }

    /// Helper constructor for invalid session keys.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        SessionError::InvalidSessionKey { reason: reason.into() }
    }

    /// Helper constructor for data the upstream does not have.
    pub fn absent(what: impl Into<String>) -> Self {
        SessionError::UpstreamDataAbsent { what: what.into() }
    }

    /// Helper constructor for upstream failures.
    pub fn upstream(reason: impl Into<String>) -> Self {
        SessionError::Upstream { reason: reason.into(), source: None }
    }

    /// Helper constructor for upstream failures with source.
    pub fn upstream_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SessionError::Upstream { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        SessionError::Config { reason: reason.into(), source: None }
    }

    /// Helper constructor for configuration errors with source.
    pub fn config_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SessionError::Config { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for failed background tasks.
    pub fn task_failed(reason: impl Into<String>) -> Self {
        SessionError::TaskFailed { reason: reason.into() }
    }
}

impl From<RetryExhausted> for SessionError {
    fn from(err: RetryExhausted) -> Self {
        SessionError::LoadTimeout {
            operation: err.operation,
            elapsed: err.elapsed,
            attempts: err.attempts,
        }
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            SessionError::task_failed("load task panicked")
        } else {
            SessionError::task_failed("load task was cancelled")
        }
    }
}
