//! Typed events emitted by the pipeline.
//!
//! Any number of sinks may observe these (a tracing sink, a bounded channel
//! feeding a front end). Emitting an event never blocks the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::verdict::VerdictKind;

/// Pipeline stage that raised an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Startup,
    Poll,
    Analyze,
    Act,
    Persist,
}

/// Observable pipeline events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum PipelineEvent {
    ServiceStarted {
        provider: String,
        source_id: String,
        safe_mode: bool,
    },
    ServiceStopped,
    TickStarted {
        since: Option<DateTime<Utc>>,
    },
    TickCompleted {
        fetched: usize,
        enqueued: usize,
        checkpoint: Option<DateTime<Utc>>,
    },
    ItemEnqueued {
        item_id: String,
    },
    ItemClassified {
        item_id: String,
        verdict: VerdictKind,
        provider: String,
        latency_ms: u64,
    },
    ItemRequeued {
        item_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    ActionTaken {
        item_id: String,
        /// Short outcome label, e.g. `applied` or `dry_run`.
        outcome: String,
    },
    /// A removal took effect at the source. Carries what a public removal
    /// log needs.
    ItemRemoved {
        item_id: String,
        body: String,
        permalink: String,
        reason: String,
    },
    RateLimited {
        wait_ms: u64,
    },
    Error {
        stage: Stage,
        message: String,
        fatal: bool,
    },
}

impl PipelineEvent {
    /// Short name of the variant, for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped => "service_stopped",
            Self::TickStarted { .. } => "tick_started",
            Self::TickCompleted { .. } => "tick_completed",
            Self::ItemEnqueued { .. } => "item_enqueued",
            Self::ItemClassified { .. } => "item_classified",
            Self::ItemRequeued { .. } => "item_requeued",
            Self::ActionTaken { .. } => "action_taken",
            Self::ItemRemoved { .. } => "item_removed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Error { .. } => "error",
        }
    }
}
