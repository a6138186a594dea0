//! Exponential backoff policy for backend failures.
//!
//! The policy is pure: it only decides *whether* and *how long*. Callers
//! realise the wait themselves (the pipeline requeues the item with the
//! delay; source calls sleep through the injected clock).

use std::time::Duration;

use modsentry_types::config::RetryConfig;
use rand::Rng;

use crate::error::{BackendError, FailureClass};

/// Longest wait accepted from a server's own retry hint. Larger hints are
/// treated as this long.
pub const MAX_RETRY_HINT: Duration = Duration::from_secs(15 * 60);

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed before giving up (default: 3).
    pub max_attempts: u32,
    /// Delay before the first retry (default: 1 second).
    pub base_delay: Duration,
    /// Upper bound on the exponential delay (default: 30 seconds).
    pub max_delay: Duration,
    /// Random `0..jitter_fraction * delay` added to each delay (default: 0).
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter_fraction: cfg.jitter_fraction,
        }
    }
}

/// What to do after a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry { delay: Duration },
    /// Budget spent: finalize as SKIP.
    Exhausted,
    /// Not worth retrying: finalize as SKIP now.
    Skip,
    /// Configuration is broken: stop the pipeline.
    Fatal,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed):
    /// `min(base_delay * 2^attempt, max_delay)` plus jitter.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt);
        let base_ms = self.base_delay.as_millis() as u64;
        let capped_ms = base_ms
            .saturating_mul(exp)
            .min(self.max_delay.as_millis() as u64);

        let jitter_max_ms = (capped_ms as f64 * self.jitter_fraction) as u64;
        let jitter_ms = if jitter_max_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_max_ms)
        } else {
            0
        };

        Duration::from_millis(capped_ms + jitter_ms)
    }

    /// Delay for retry `attempt`, stretched to the server's hint when that is
    /// longer. The hint is capped at [`MAX_RETRY_HINT`].
    pub fn hinted_delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = self.compute_delay(attempt);
        match hint {
            Some(hint) => computed.max(hint.min(MAX_RETRY_HINT)),
            None => computed,
        }
    }

    /// Decide the fate of an item whose backend call failed with `err` after
    /// `retries_so_far` retries had already been scheduled.
    pub fn decide(&self, err: &BackendError, retries_so_far: u32) -> RetryDecision {
        match err.class() {
            FailureClass::Malformed => RetryDecision::Skip,
            FailureClass::FatalConfig => RetryDecision::Fatal,
            FailureClass::Unavailable if retries_so_far >= self.max_attempts => {
                RetryDecision::Exhausted
            }
            FailureClass::Unavailable => {
                let hint = match err {
                    BackendError::RateLimited { retry_after_ms } => {
                        Some(Duration::from_millis(*retry_after_ms))
                    }
                    _ => None,
                };
                RetryDecision::Retry {
                    delay: self.hinted_delay(retries_so_far, hint),
                }
            }
        }
    }
}
