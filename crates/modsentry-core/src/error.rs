//! Error types for the pipeline crate.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use modsentry_llm::BackendError;
use modsentry_types::{ConfigError, SourceError};
use thiserror::Error;

/// Failures of durable state (queue snapshot, checkpoint, audit log).
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A state file exists but cannot be parsed.
    #[error("corrupt state file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// An attempt to move the checkpoint backwards.
    #[error("checkpoint regression: {current} -> {proposed}")]
    CheckpointRegression {
        current: DateTime<Utc>,
        proposed: DateTime<Utc>,
    },

    /// A second audit record for the same item.
    #[error("duplicate audit record for item {0}")]
    DuplicateAudit(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that stop the pipeline (or abort startup).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The backend reported a configuration problem.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The content source failed after retries.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A spawned task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
