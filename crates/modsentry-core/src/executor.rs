//! Applies the moderation action for ACT verdicts.
//!
//! Idempotent per item: a local cache of applied ids plus an
//! `is_action_applied` probe against the source mean a retried or restarted
//! run never issues the same removal twice. In safe mode nothing is sent to
//! the source at all.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modsentry_llm::RetryPolicy;
use modsentry_types::{Item, SourceError, VerdictKind};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::source::{Action, ContentSource, retry_source};

/// What happened when the executor handled a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action was applied by this call.
    Applied,
    /// The action was already in effect (locally known or reported by the source).
    AlreadyApplied,
    /// Safe mode: the action would have been applied.
    DryRun,
    /// Verdict was not ACT.
    NotRequired,
    /// The account may not perform the action.
    PermissionDenied(String),
    /// The item is gone.
    NotFound,
    /// Retries exhausted on transient failures.
    TransientFailure(String),
}

impl ActionOutcome {
    /// Whether the external effect is in place.
    pub fn action_taken(&self) -> bool {
        matches!(self, Self::Applied | Self::AlreadyApplied)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already_applied",
            Self::DryRun => "dry_run",
            Self::NotRequired => "not_required",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound => "not_found",
            Self::TransientFailure(_) => "transient_failure",
        }
    }
}

pub struct ActionExecutor {
    source: Arc<dyn ContentSource>,
    safe_mode: bool,
    applied: Mutex<HashSet<String>>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    max_retries: u32,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(
        source: Arc<dyn ContentSource>,
        safe_mode: bool,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        max_retries: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            safe_mode,
            applied: Mutex::new(HashSet::new()),
            clock,
            policy,
            max_retries,
            timeout,
        }
    }

    pub fn safe_mode(&self) -> bool {
        self.safe_mode
    }

    fn is_cached(&self, id: &str) -> bool {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    fn mark_applied(&self, id: &str) {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string());
    }

    /// Handle `verdict` for `item`.
    pub async fn apply(&self, item: &Item, verdict: VerdictKind) -> ActionOutcome {
        if verdict != VerdictKind::Act {
            return ActionOutcome::NotRequired;
        }

        if self.safe_mode {
            info!(
                item_id = %item.id,
                author = %item.author,
                permalink = %item.permalink,
                body = %item.clean_body(),
                "WOULD REMOVE (safe mode)"
            );
            return ActionOutcome::DryRun;
        }

        if self.is_cached(&item.id) {
            return ActionOutcome::AlreadyApplied;
        }

        match self.check_applied(&item.id).await {
            Ok(true) => {
                info!(item_id = %item.id, "action already in effect");
                self.mark_applied(&item.id);
                return ActionOutcome::AlreadyApplied;
            }
            Ok(false) => {}
            Err(e) => {
                // The probe is advisory; removal is idempotent at the source.
                warn!(item_id = %item.id, error = %e, "could not check action state");
            }
        }

        let result = retry_source(
            self.clock.as_ref(),
            &self.policy,
            self.max_retries,
            "apply_action",
            || self.apply_once(&item.id),
        )
        .await;

        match result {
            Ok(()) => {
                info!(item_id = %item.id, author = %item.author, "removed");
                self.mark_applied(&item.id);
                ActionOutcome::Applied
            }
            Err(SourceError::Permission(msg)) => {
                error!(
                    item_id = %item.id,
                    error = %msg,
                    "permission denied removing item; check the account's moderator permissions"
                );
                ActionOutcome::PermissionDenied(msg)
            }
            Err(SourceError::NotFound(_)) => {
                warn!(item_id = %item.id, "item no longer exists");
                ActionOutcome::NotFound
            }
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "removal failed after retries");
                ActionOutcome::TransientFailure(e.to_string())
            }
        }
    }

    async fn check_applied(&self, id: &str) -> Result<bool, SourceError> {
        retry_source(
            self.clock.as_ref(),
            &self.policy,
            self.max_retries,
            "is_action_applied",
            || async {
                tokio::time::timeout(self.timeout, self.source.is_action_applied(id, Action::Remove))
                    .await
                    .unwrap_or_else(|_| Err(SourceError::Transient("timed out".into())))
            },
        )
        .await
    }

    async fn apply_once(&self, id: &str) -> Result<(), SourceError> {
        tokio::time::timeout(self.timeout, self.source.apply_action(id, Action::Remove))
            .await
            .unwrap_or_else(|_| Err(SourceError::Transient("timed out".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scripted {
        removals: Mutex<Vec<String>>,
        remove_results: Mutex<VecDeque<Result<(), SourceError>>>,
        already: bool,
    }

    #[async_trait]
    impl ContentSource for Scripted {
        async fn list_new_items(
            &self,
            _source_id: &str,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<Item>, SourceError> {
            Ok(Vec::new())
        }

        async fn apply_action(&self, item_id: &str, _action: Action) -> Result<(), SourceError> {
            self.removals.lock().unwrap().push(item_id.to_string());
            self.remove_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn is_action_applied(&self, _item_id: &str, _action: Action) -> Result<bool, SourceError> {
            Ok(self.already)
        }
    }

    fn item(id: &str) -> Item {
        Item {
            id: id.into(),
            body: "spam spam".into(),
            author: "spammer".into(),
            created_at: Utc::now(),
            permalink: format!("/r/test/comments/x/{id}"),
        }
    }

    fn executor(source: Arc<Scripted>, safe_mode: bool) -> ActionExecutor {
        ActionExecutor::new(
            source,
            safe_mode,
            Arc::new(ManualClock::new(Utc::now())),
            RetryPolicy::default(),
            2,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn non_act_is_not_required() {
        let src = Arc::new(Scripted::default());
        let ex = executor(src.clone(), false);
        assert_eq!(ex.apply(&item("a"), VerdictKind::NoAct).await, ActionOutcome::NotRequired);
        assert_eq!(ex.apply(&item("a"), VerdictKind::Skip).await, ActionOutcome::NotRequired);
        assert!(src.removals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn safe_mode_never_touches_source() {
        let src = Arc::new(Scripted::default());
        let ex = executor(src.clone(), true);
        let out = ex.apply(&item("a"), VerdictKind::Act).await;
        assert_eq!(out, ActionOutcome::DryRun);
        assert!(!out.action_taken());
        assert!(src.removals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn applies_once() {
        let src = Arc::new(Scripted::default());
        let ex = executor(src.clone(), false);
        assert_eq!(ex.apply(&item("a"), VerdictKind::Act).await, ActionOutcome::Applied);
        assert_eq!(ex.apply(&item("a"), VerdictKind::Act).await, ActionOutcome::AlreadyApplied);
        assert_eq!(src.removals.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn source_reports_already_applied() {
        let src = Arc::new(Scripted {
            already: true,
            ..Default::default()
        });
        let ex = executor(src.clone(), false);
        let out = ex.apply(&item("a"), VerdictKind::Act).await;
        assert_eq!(out, ActionOutcome::AlreadyApplied);
        assert!(out.action_taken());
        assert!(src.removals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn permission_denied_is_reported() {
        let src = Arc::new(Scripted::default());
        src.remove_results
            .lock()
            .unwrap()
            .push_back(Err(SourceError::Permission("403".into())));
        let ex = executor(src.clone(), false);
        let out = ex.apply(&item("a"), VerdictKind::Act).await;
        assert_eq!(out, ActionOutcome::PermissionDenied("403".into()));
        assert!(!out.action_taken());
    }

    #[tokio::test]
    async fn transient_failures_exhaust() {
        let src = Arc::new(Scripted::default());
        for _ in 0..3 {
            src.remove_results
                .lock()
                .unwrap()
                .push_back(Err(SourceError::Transient("502".into())));
        }
        let ex = executor(src.clone(), false);
        let out = ex.apply(&item("a"), VerdictKind::Act).await;
        assert!(matches!(out, ActionOutcome::TransientFailure(_)));
        assert_eq!(src.removals.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn transient_then_success() {
        let src = Arc::new(Scripted::default());
        src.remove_results
            .lock()
            .unwrap()
            .push_back(Err(SourceError::Transient("502".into())));
        let ex = executor(src.clone(), false);
        assert_eq!(ex.apply(&item("a"), VerdictKind::Act).await, ActionOutcome::Applied);
        assert_eq!(src.removals.lock().unwrap().len(), 2);
    }
}
