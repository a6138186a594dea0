//! Error types shared across modsentry crates.
//!
//! [`SourceError`] is returned by content-source implementations and is
//! interpreted by the poller and the action executor. [`ConfigError`] is
//! produced by [`Config::validate`](crate::config::Config::validate).

use thiserror::Error;

/// Errors reported by a content source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SourceError {
    // ── Recoverable ──────────────────────────────────────────────────

    /// Network hiccup or server-side error; worth retrying.
    #[error("transient source error: {0}")]
    Transient(String),

    /// The source is throttling us.
    #[error("source rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    // ── Fatal to the single action ───────────────────────────────────

    /// The account lacks permission for the operation.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The target item no longer exists.
    #[error("not found: {0}")]
    NotFound(String),
}

impl SourceError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Source-suggested wait before retrying, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Invalid or incomplete configuration, detected at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// One or more required settings are missing.
    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<String>),

    /// A setting has an unusable value.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        field: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_source_errors() {
        assert_eq!(
            SourceError::Transient("connection reset".into()).to_string(),
            "transient source error: connection reset"
        );
        assert_eq!(
            SourceError::RateLimited { retry_after_ms: 1500 }.to_string(),
            "source rate limited: retry after 1500ms"
        );
        assert_eq!(
            SourceError::Permission("not a moderator".into()).to_string(),
            "permission denied: not a moderator"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(SourceError::Transient("x".into()).is_transient());
        assert!(SourceError::RateLimited { retry_after_ms: 1 }.is_transient());
        assert!(!SourceError::Permission("x".into()).is_transient());
        assert!(!SourceError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn retry_after_only_for_rate_limit() {
        assert_eq!(
            SourceError::RateLimited { retry_after_ms: 42 }.retry_after_ms(),
            Some(42)
        );
        assert_eq!(SourceError::Transient("x".into()).retry_after_ms(), None);
    }

    #[test]
    fn display_config_errors() {
        let err = ConfigError::Missing(vec!["source.client_id".into(), "source.subreddit".into()]);
        assert_eq!(
            err.to_string(),
            "missing required settings: source.client_id, source.subreddit"
        );
        let err = ConfigError::Invalid {
            field: "backend.provider".into(),
            reason: "unknown".into(),
        };
        assert_eq!(err.to_string(), "invalid setting backend.provider: unknown");
    }
}
