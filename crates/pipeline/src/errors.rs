//! Error and retry-policy types for the Sift search domain.
//!
//! [`SearchError`] covers conditions the run itself reports: some are fatal
//! ([`SearchError::ConfigInvalid`], [`SearchError::CredentialExhausted`]), the
//! rest are recovered at window or hit level and end up in the run summary.
//! Port-level errors ([`TransportError`], [`OracleError`], [`StoreError`]) are
//! produced by infrastructure adapters.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::QuotaResource;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the executor decide whether
/// to re-issue a request, rotate credentials, or give up on a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from `Retry-After` or `x-ratelimit-reset` response headers).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the search engine.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The run configuration is unusable (inverted date range, bad regex,
    /// no entity kinds). Raised before any network call.
    #[error("Invalid configuration: {message}")]
    ConfigInvalid {
        /// Description of the configuration problem.
        message: String,
    },

    /// Every credential in the pool is revoked or the pool is empty.
    #[error(
        "All {credentials} GitHub token(s) are invalid or revoked; add working tokens to the token file"
    )]
    CredentialExhausted {
        /// Pool size at the time of exhaustion.
        credentials: usize,
    },

    /// A window could not be completed after all retries and rotations.
    ///
    /// Recovered at run level: the window is skipped and listed in the summary.
    #[error("Window {window} failed: {reason}")]
    WindowFailed {
        /// Human-readable window description (`"<kind> <start>..<end>"`).
        window: String,
        reason: String,
    },

    /// The run was cancelled before the operation finished.
    #[error("Run cancelled")]
    Cancelled,

    /// A transient transport failure that outlived its retry budget inside a
    /// single request.
    #[error("Transient transport failure: {message}")]
    TransportTransient { message: String },

    /// Reading or writing durable state failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl SearchError {
    /// Shorthand for [`SearchError::ConfigInvalid`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that must end the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. }
                | Self::CredentialExhausted { .. }
                | Self::Cancelled
                | Self::Storage(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Failure of a single GitHub transport request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Primary or secondary rate limit hit for the credential used.
    #[error("Rate limited (resets at {reset_at:?}): {message}")]
    RateLimited {
        /// Bucket named by the response, when it says.
        resource: Option<QuotaResource>,
        reset_at: Option<DateTime<Utc>>,
        message: String,
    },

    /// The credential was rejected (401). It will not recover this run.
    #[error("Credential rejected: {message}")]
    Unauthorized { message: String },

    /// Network error, timeout, or 5xx response.
    #[error("Transient failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The request itself is wrong (e.g. 422 on an invalid query).
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl TransportError {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::RateLimited { .. } | Self::Unauthorized { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            Self::Transient { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Rejected { .. } => RetryPolicy::NonRetryable,
        }
    }
}

/// Failure of a relevance-oracle call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    /// Provider unreachable, rate limited, or 5xx.
    #[error("Oracle unavailable: {message}")]
    Unavailable { message: String },

    /// The provider refused the request (bad key, unknown model).
    #[error("Oracle rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The provider answered but the content could not be interpreted.
    #[error("Oracle returned an unusable response: {message}")]
    InvalidResponse { message: String },
}

impl OracleError {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Unavailable { .. } => RetryPolicy::Retryable { after: None },
            Self::Rejected { .. } | Self::InvalidResponse { .. } => RetryPolicy::NonRetryable,
        }
    }
}

/// Failure of a file-backed store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed content in {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("Not found: {name}")]
    NotFound { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_requests_are_not_retried() {
        let err = TransportError::Rejected {
            status: 422,
            message: "Validation Failed".into(),
        };
        assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
    }

    #[test]
    fn transient_errors_forward_retry_after() {
        let err = TransportError::Transient {
            message: "502".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(
            err.retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(3))
            }
        );
    }

    #[test]
    fn only_unreachable_oracles_are_retried() {
        let down = OracleError::Unavailable {
            message: "503".into(),
        };
        assert!(down.retry_policy().is_retryable());
        let refused = OracleError::Rejected {
            status: 401,
            message: "invalid api key".into(),
        };
        assert_eq!(refused.retry_policy(), RetryPolicy::NonRetryable);
    }

    #[test]
    fn window_and_transport_failures_are_not_fatal() {
        assert!(SearchError::config("bad").is_fatal());
        assert!(SearchError::CredentialExhausted { credentials: 2 }.is_fatal());
        assert!(SearchError::Cancelled.is_fatal());
        assert!(!SearchError::WindowFailed {
            window: "commit 2024-01-01..2024-01-02".into(),
            reason: "retries exhausted".into()
        }
        .is_fatal());
        assert!(!SearchError::TransportTransient {
            message: "timeout".into()
        }
        .is_fatal());
    }
}
