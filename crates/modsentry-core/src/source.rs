//! The content source seam.
//!
//! A [`ContentSource`] lists new items for a source id (a subreddit) and can
//! apply the single moderation action to an item. The Reddit client in
//! `modsentry-reddit` is the production implementation; tests use in-memory
//! fakes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modsentry_llm::RetryPolicy;
use modsentry_types::{Item, SourceError};
use tracing::warn;

use crate::clock::Clock;

/// The moderation action a source can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Remove,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remove => "remove",
        }
    }
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Items for `source_id` created after `since` (all recent items when
    /// `None`). Order is not guaranteed.
    async fn list_new_items(
        &self,
        source_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Item>, SourceError>;

    /// Apply `action` to the item. Applying an already-applied action must
    /// not be an error.
    async fn apply_action(&self, item_id: &str, action: Action) -> Result<(), SourceError>;

    /// Whether `action` is already in effect for the item.
    async fn is_action_applied(&self, item_id: &str, action: Action) -> Result<bool, SourceError>;
}

/// Run a source call, retrying transient failures up to `max_retries` times
/// with the policy's backoff (or the source's own hint, if longer).
pub(crate) async fn retry_source<T, F, Fut>(
    clock: &dyn Clock,
    policy: &RetryPolicy,
    max_retries: u32,
    what: &str,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let hint = e.retry_after_ms().map(Duration::from_millis);
                let delay = policy.hinted_delay(attempt, hint);
                warn!(
                    op = what,
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "source call failed, retrying"
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let clock = ManualClock::new(Utc::now());
        let calls = AtomicU32::new(0);
        let out = retry_source(&clock, &RetryPolicy::default(), 3, "list", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SourceError::Transient("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn honours_rate_limit_hint() {
        let clock = ManualClock::new(Utc::now());
        let calls = AtomicU32::new(0);
        let _ = retry_source(&clock, &RetryPolicy::default(), 3, "list", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SourceError::RateLimited {
                    retry_after_ms: 5000,
                })
            } else {
                Ok(())
            }
        })
        .await;
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn oversized_hint_is_capped() {
        let clock = ManualClock::new(Utc::now());
        let calls = AtomicU32::new(0);
        retry_source(&clock, &RetryPolicy::default(), 3, "list", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SourceError::RateLimited {
                    retry_after_ms: u64::MAX,
                })
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(clock.sleeps(), vec![modsentry_llm::MAX_RETRY_HINT]);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let clock = ManualClock::new(Utc::now());
        let calls = AtomicU32::new(0);
        let err = retry_source(&clock, &RetryPolicy::default(), 2, "list", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(SourceError::Transient("down".into()))
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permission_errors() {
        let clock = ManualClock::new(Utc::now());
        let calls = AtomicU32::new(0);
        let err = retry_source(&clock, &RetryPolicy::default(), 3, "remove", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(SourceError::Permission("not a mod".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(err, SourceError::Permission("not a mod".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }
}
