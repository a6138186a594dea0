//! Classification outcomes and audit records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The terminal classification of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    /// The item violates the ruleset; the action (removal) applies.
    Act,
    /// The item is fine; nothing to do.
    NoAct,
    /// No usable classification was obtained (or the item was filtered).
    Skip,
}

impl VerdictKind {
    /// Wire / log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Act => "ACT",
            Self::NoAct => "NO_ACT",
            Self::Skip => "SKIP",
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized verdict plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub kind: VerdictKind,
    /// Free-text reasoning (model output, or why the item was skipped).
    pub reasoning: String,
    /// Backend that produced the verdict (`"filter"` for pre-analysis skips).
    pub provider: String,
}

impl Verdict {
    pub fn new(kind: VerdictKind, reasoning: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            kind,
            reasoning: reasoning.into(),
            provider: provider.into(),
        }
    }

    /// A SKIP verdict with the given reason.
    pub fn skip(reasoning: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::new(VerdictKind::Skip, reasoning, provider)
    }
}

/// Token usage and estimated cost of one backend call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Estimated cost in USD.
    #[serde(default)]
    pub estimated_cost: f64,
}

/// One append-only line of the audit log.
///
/// Exactly one record exists per processed item. Records are never mutated
/// after they are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub item_id: String,
    pub verdict: VerdictKind,
    /// Whether the external effect is in place after processing.
    pub action_taken: bool,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    /// Wall time spent in the backend call(s) for the final attempt.
    pub latency_ms: u64,
    #[serde(default)]
    pub reasoning: String,

    /// Backend retries consumed before the terminal transition.
    #[serde(default)]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}
