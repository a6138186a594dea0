//! Analysis backends for modsentry.
//!
//! This crate turns comment text into an ACT/NO_ACT classification through
//! one of a closed set of providers, and maps every provider failure onto a
//! small, uniform taxonomy the pipeline can act on.
//!
//! # Architecture
//!
//! - [`Backend`] trait defines `classify` / `check_health`
//! - [`OllamaBackend`], [`GeminiBackend`] and [`OpenAiCompatBackend`]
//!   (DeepSeek) implement it
//! - [`build_backend`] picks the variant from configuration, once, at startup
//! - [`extract_decision`] reads the verdict out of free-text answers
//! - [`RetryPolicy`] decides retry/skip/fatal and the backoff delay
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use modsentry_llm::{build_backend, Ruleset};
//!
//! let backend = build_backend(&config.backend)?;
//! backend.check_health().await?;
//! let c = backend.classify("buy cheap followers!!!", &Ruleset::builtin()).await?;
//! println!("{} via {}", c.verdict, backend.name());
//! ```

pub mod backend;
pub mod decision;
pub mod error;
pub mod gemini;
mod http;
pub mod ollama;
pub mod openai_compat;
pub mod retry;
pub mod types;

pub use backend::{Backend, build_backend};
pub use decision::{Decision, extract_decision};
pub use error::{BackendError, FailureClass, Result};
pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;
pub use openai_compat::{OpenAiCompatBackend, SamplingParams};
pub use retry::{MAX_RETRY_HINT, RetryDecision, RetryPolicy};
pub use types::{Classification, Pricing, Ruleset};
