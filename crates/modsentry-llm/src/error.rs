//! Backend error types for modsentry-llm.
//!
//! All backend operations return [`Result<T>`] which uses [`BackendError`]
//! as the error type. Every variant belongs to exactly one
//! [`FailureClass`], which is what the pipeline acts on.

use thiserror::Error;

/// Errors that can occur when talking to an analysis backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Network failure or server-side error (HTTP 5xx).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend returned a rate-limit response (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// The request timed out.
    #[error("timeout")]
    Timeout,

    /// The response could not be turned into a verdict.
    #[error("malformed response: {reason}")]
    Malformed {
        reason: String,
        /// First 200 characters of the offending payload.
        excerpt: String,
    },

    /// Credentials, model name or billing are wrong; retrying cannot help.
    #[error("backend misconfigured: {0}")]
    FatalConfig(String),
}

/// How the pipeline treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry with backoff, SKIP once the budget is spent.
    Unavailable,
    /// SKIP immediately.
    Malformed,
    /// Abort startup, or halt the pipeline mid-run.
    FatalConfig,
}

impl BackendError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Unavailable(_) | Self::RateLimited { .. } | Self::Timeout => {
                FailureClass::Unavailable
            }
            Self::Malformed { .. } => FailureClass::Malformed,
            Self::FatalConfig(_) => FailureClass::FatalConfig,
        }
    }

    /// Build a [`BackendError::Malformed`] carrying an excerpt of `payload`.
    pub fn malformed(reason: impl Into<String>, payload: &str) -> Self {
        Self::Malformed {
            reason: reason.into(),
            excerpt: excerpt(payload),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed {
                reason: format!("failed to decode body: {err}"),
                excerpt: String::new(),
            }
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed {
            reason: format!("json error: {err}"),
            excerpt: String::new(),
        }
    }
}

/// First 200 characters of `s`, on a char boundary.
pub fn excerpt(s: &str) -> String {
    s.chars().take(200).collect()
}

/// A convenience type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
