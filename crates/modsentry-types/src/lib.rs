//! Core types for the modsentry moderation pipeline.
//!
//! This crate has no runtime dependencies beyond serde/chrono and is shared
//! by every other modsentry crate.
//!
//! # Modules
//!
//! - [`item`] -- Items fetched from the content source and their queue wrapper
//! - [`verdict`] -- Classification outcomes and the append-only audit record
//! - [`config`] -- Immutable process configuration
//! - [`event`] -- Typed events published to attached sinks
//! - [`error`] -- Content-source and configuration errors
//! - [`secret`] -- Redacting wrapper for credentials

pub mod config;
pub mod error;
pub mod event;
pub mod item;
pub mod secret;
pub mod verdict;

pub use config::{BackendConfig, BackendKind, Config, WikiConfig};
pub use error::{ConfigError, SourceError};
pub use event::{PipelineEvent, Stage};
pub use item::{Item, QueueEntry};
pub use secret::SecretString;
pub use verdict::{AuditRecord, Usage, Verdict, VerdictKind};
