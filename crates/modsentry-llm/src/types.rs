//! Request/response types shared by all backends.

use modsentry_types::{Usage, VerdictKind};

/// The built-in moderation ruleset.
///
/// Leans towards keeping content: only clear, unambiguous violations are
/// removed. Every answer must end with a `DECISION:` line.
pub const BUILTIN_RULESET: &str = "\
You are a content moderator for a Reddit community with its own rules and guidelines.

Remove a comment only when it clearly violates the community's rules:
- spam, promotional or off-topic content
- personal attacks, harassment or hostile behaviour
- content that breaks platform-wide policies

Keep constructive discussion, genuine questions, respectfully expressed opinions,
technical discussion and anything where the violation is unclear.

When in doubt, KEEP. Only choose REMOVE when you can point to clear evidence.

Format your response as:
[Brief reasoning about why this comment does or does not violate the rules]
DECISION: REMOVE or DECISION: KEEP

Always end with exactly \"DECISION: REMOVE\" or \"DECISION: KEEP\".";

/// The ruleset an item is classified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    prompt: String,
}

impl Ruleset {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_RULESET)
    }

    /// The configured override, or the built-in ruleset.
    pub fn from_override(custom: Option<&str>) -> Self {
        match custom {
            Some(p) if !p.trim().is_empty() => Self::new(p),
            _ => Self::builtin(),
        }
    }

    /// The ruleset as a system prompt.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Ruleset and item text in a single prompt, for backends without a
    /// separate system role.
    pub fn combined_prompt(&self, text: &str) -> String {
        format!("{}\n\nComment to analyze: {}", self.prompt, text)
    }
}

impl Default for Ruleset {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A successful classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// `Act` or `NoAct`. Backends never produce `Skip`.
    pub verdict: VerdictKind,
    /// The model's raw answer.
    pub reasoning: String,
    pub usage: Usage,
}

/// Per-1K-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    pub const FREE: Pricing = Pricing {
        input_per_1k: 0.0,
        output_per_1k: 0.0,
    };
    pub const GEMINI: Pricing = Pricing {
        input_per_1k: 0.000125,
        output_per_1k: 0.000375,
    };
    pub const DEEPSEEK: Pricing = Pricing {
        input_per_1k: 0.00014,
        output_per_1k: 0.00028,
    };

    /// Build a [`Usage`] with the estimated cost, rounded to 6 decimals.
    pub fn usage(&self, input_tokens: u64, output_tokens: u64) -> Usage {
        let raw = (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k;
        Usage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            estimated_cost: (raw * 1_000_000.0).round() / 1_000_000.0,
        }
    }
}

/// Rough token count: one token per four characters.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}
