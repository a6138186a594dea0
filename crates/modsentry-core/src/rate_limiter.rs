//! Sliding-window budget for outbound backend calls.
//!
//! Two windows are tracked, the last minute and the last hour, each with its
//! own ceiling (`0` = unlimited). Every granted call records its timestamp in
//! a `VecDeque`, oldest first; timestamps older than an hour are pruned on
//! each [`RateLimiter::acquire`].
//!
//! Calls over budget are delayed, never dropped: `acquire` reports how long
//! until the oldest counted call leaves the binding window, and
//! [`RateLimiter::until_granted`] sleeps through the injected [`Clock`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use modsentry_types::config::RateLimitConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::{Clock, until};

fn minute() -> chrono::Duration {
    chrono::Duration::seconds(60)
}

fn hour() -> chrono::Duration {
    chrono::Duration::seconds(3600)
}

/// Outcome of a single [`RateLimiter::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The call may proceed; it has been counted.
    Granted,
    /// Budget exhausted; try again after this long.
    Wait(Duration),
}

pub struct RateLimiter {
    per_minute: u32,
    per_hour: u32,
    /// Grant timestamps within the last hour, oldest first.
    grants: Mutex<VecDeque<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            per_minute: config.per_minute,
            per_hour: config.per_hour,
            grants: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Try to take one unit of budget.
    pub fn acquire(&self) -> Acquire {
        let now = self.clock.now();
        let mut grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());

        while grants.front().is_some_and(|t| now - *t >= hour()) {
            grants.pop_front();
        }

        let mut wait = Duration::ZERO;

        if self.per_minute > 0 {
            let in_minute = grants.iter().rev().take_while(|t| now - **t < minute()).count();
            if in_minute >= self.per_minute as usize {
                // Oldest call still inside the minute window.
                let oldest = grants[grants.len() - in_minute];
                wait = wait.max(until(now, oldest + minute()));
            }
        }

        if self.per_hour > 0
            && grants.len() >= self.per_hour as usize
            && let Some(oldest) = grants.front()
        {
            wait = wait.max(until(now, *oldest + hour()));
        }

        if wait > Duration::ZERO {
            Acquire::Wait(wait)
        } else {
            grants.push_back(now);
            Acquire::Granted
        }
    }

    /// Block (through the clock) until a call is granted.
    ///
    /// Returns the total time waited, or `None` if `cancel` fired first.
    pub async fn until_granted(&self, cancel: &CancellationToken) -> Option<Duration> {
        let mut waited = Duration::ZERO;
        loop {
            match self.acquire() {
                Acquire::Granted => return Some(waited),
                Acquire::Wait(d) => {
                    debug!(wait_ms = d.as_millis() as u64, "rate budget exhausted, waiting");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = self.clock.sleep(d) => waited += d,
                    }
                }
            }
        }
    }

    /// Calls counted in the last minute and the last hour.
    pub fn usage(&self) -> (usize, usize) {
        let now = self.clock.now();
        let grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());
        let last_minute = grants.iter().filter(|t| now - **t < minute()).count();
        let last_hour = grants.iter().filter(|t| now - **t < hour()).count();
        (last_minute, last_hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(per_minute: u32, per_hour: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cfg = RateLimitConfig {
            per_minute,
            per_hour,
        };
        (RateLimiter::new(&cfg, clock.clone()), clock)
    }

    // --- Test 1: Calls within budget are granted ---
    #[test]
    fn within_budget() {
        let (rl, _clock) = limiter(3, 0);
        for _ in 0..3 {
            assert_eq!(rl.acquire(), Acquire::Granted);
        }
    }

    // --- Test 2: Over budget reports the wait until the oldest leaves ---
    #[test]
    fn over_minute_budget_waits() {
        let (rl, clock) = limiter(2, 0);
        assert_eq!(rl.acquire(), Acquire::Granted);
        clock.advance(Duration::from_secs(10));
        assert_eq!(rl.acquire(), Acquire::Granted);
        assert_eq!(rl.acquire(), Acquire::Wait(Duration::from_secs(50)));
        clock.advance(Duration::from_secs(50));
        assert_eq!(rl.acquire(), Acquire::Granted);
    }

    // --- Test 3: The hourly window binds independently ---
    #[test]
    fn hour_budget_binds() {
        let (rl, clock) = limiter(0, 2);
        assert_eq!(rl.acquire(), Acquire::Granted);
        clock.advance(Duration::from_secs(600));
        assert_eq!(rl.acquire(), Acquire::Granted);
        assert_eq!(rl.acquire(), Acquire::Wait(Duration::from_secs(3000)));
    }

    // --- Test 4: Zero means unlimited ---
    #[test]
    fn zero_is_unlimited() {
        let (rl, _clock) = limiter(0, 0);
        for _ in 0..10_000 {
            assert_eq!(rl.acquire(), Acquire::Granted);
        }
    }

    // --- Test 5: Bursts never exceed the ceiling in any rolling window ---
    #[tokio::test]
    async fn burst_respects_rolling_window() {
        let (rl, clock) = limiter(5, 0);
        let cancel = CancellationToken::new();
        let mut granted_at = Vec::new();
        for _ in 0..23 {
            rl.until_granted(&cancel).await.unwrap();
            granted_at.push(clock.now());
        }
        assert_eq!(granted_at.len(), 23, "no call may be dropped");
        for (i, start) in granted_at.iter().enumerate() {
            let in_window = granted_at[i..]
                .iter()
                .take_while(|t| **t - *start < minute())
                .count();
            assert!(in_window <= 5, "window starting at call {i} has {in_window}");
        }
        assert!(!clock.sleeps().is_empty());
    }

    // --- Test 6: Cancellation interrupts the wait ---
    #[tokio::test]
    async fn cancel_while_waiting() {
        let (rl, _clock) = limiter(1, 0);
        let cancel = CancellationToken::new();
        assert_eq!(rl.until_granted(&cancel).await, Some(Duration::ZERO));
        cancel.cancel();
        assert_eq!(rl.until_granted(&cancel).await, None);
    }

    // --- Test 7: Usage reports both windows ---
    #[test]
    fn usage_counts() {
        let (rl, clock) = limiter(0, 0);
        rl.acquire();
        clock.advance(Duration::from_secs(120));
        rl.acquire();
        assert_eq!(rl.usage(), (1, 2));
    }
}
