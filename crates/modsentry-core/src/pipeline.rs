//! Consumer task: analyze queued items and act on the verdicts.
//!
//! Per entry the lifecycle is
//!
//! ```text
//! ENQUEUED -> ANALYZING -> ACTING -> COMPLETED
//!                 |
//!                 +--> ENQUEUED          (backend unavailable, within budget)
//!                 +--> COMPLETED(SKIP)   (budget spent, malformed, filtered)
//! ```
//!
//! COMPLETED is terminal and produces exactly one audit record. The audit
//! line is written before the queue entry is removed, so a crash in between
//! is healed on restart: the entry is found in the audit log and completed
//! without being analyzed again.

use std::sync::Arc;
use std::time::Duration;

use modsentry_llm::{Backend, BackendError, RetryDecision, RetryPolicy, Ruleset};
use modsentry_types::{
    AuditRecord, PipelineEvent, QueueEntry, Stage, Usage, Verdict, VerdictKind,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::clock::{Clock, until};
use crate::error::{PersistenceError, PipelineError, Result};
use crate::events::EventBus;
use crate::executor::{ActionExecutor, ActionOutcome};
use crate::filter::ItemFilter;
use crate::queue::PersistentQueue;
use crate::rate_limiter::RateLimiter;

/// Provider recorded for items skipped before analysis.
pub const FILTER_PROVIDER: &str = "filter";

/// Result of one [`Pipeline::process_next`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The entry reached COMPLETED; this is its audit record.
    Completed(AuditRecord),
    /// The backend was unavailable; the entry is back in the queue.
    Requeued { delay: Duration },
    /// Cancelled while waiting for rate budget; the entry is back at the head.
    Released,
    /// The entry had been audited before a crash; it was only removed.
    AlreadyAudited,
    /// Nothing eligible. Carries the time until the next delayed entry, if any.
    Idle(Option<Duration>),
}

pub struct Pipeline {
    queue: Arc<PersistentQueue>,
    audit: Arc<AuditLog>,
    backend: Arc<dyn Backend>,
    ruleset: Ruleset,
    limiter: Arc<RateLimiter>,
    executor: Arc<ActionExecutor>,
    filter: ItemFilter,
    policy: RetryPolicy,
    events: EventBus,
    clock: Arc<dyn Clock>,
    classify_timeout: Duration,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<PersistentQueue>,
        audit: Arc<AuditLog>,
        backend: Arc<dyn Backend>,
        ruleset: Ruleset,
        limiter: Arc<RateLimiter>,
        executor: Arc<ActionExecutor>,
        filter: ItemFilter,
        policy: RetryPolicy,
        events: EventBus,
        clock: Arc<dyn Clock>,
        classify_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            audit,
            backend,
            ruleset,
            limiter,
            executor,
            filter,
            policy,
            events,
            clock,
            classify_timeout,
        }
    }

    /// Take the next eligible entry through one step of its lifecycle.
    pub async fn process_next(&self, cancel: &CancellationToken) -> Result<Step> {
        let Some(entry) = self.queue.dequeue() else {
            return Ok(Step::Idle(self.queue.next_eligible_in()));
        };

        if self.audit.contains(entry.id()).await {
            debug!(item_id = %entry.id(), "already audited, completing");
            self.complete(entry.id())?;
            return Ok(Step::AlreadyAudited);
        }

        if let Some(reason) = self.filter.check(&entry.item) {
            debug!(item_id = %entry.id(), %reason, "filtered");
            let record = self
                .finalize(&entry, Verdict::skip(reason, FILTER_PROVIDER), false, 0, None)
                .await?;
            return Ok(Step::Completed(record));
        }

        let Some(waited) = self.limiter.until_granted(cancel).await else {
            self.queue.release(entry);
            return Ok(Step::Released);
        };
        if !waited.is_zero() {
            self.events.emit(PipelineEvent::RateLimited {
                wait_ms: waited.as_millis() as u64,
            });
        }

        let started = self.clock.now();
        let result = tokio::time::timeout(
            self.classify_timeout,
            self.backend.classify(&entry.item.body, &self.ruleset),
        )
        .await
        .unwrap_or(Err(BackendError::Timeout));
        let latency_ms = until(started, self.clock.now()).as_millis() as u64;
        let provider = self.backend.name().to_string();

        let classification = match result {
            Ok(c) => c,
            Err(err) => return self.on_backend_error(entry, err, latency_ms).await,
        };

        let outcome = self.executor.apply(&entry.item, classification.verdict).await;
        if outcome != ActionOutcome::NotRequired {
            self.events.emit(PipelineEvent::ActionTaken {
                item_id: entry.id().to_string(),
                outcome: outcome.label().to_string(),
            });
        }
        if outcome == ActionOutcome::Applied {
            self.events.emit(PipelineEvent::ItemRemoved {
                item_id: entry.id().to_string(),
                body: entry.item.body.clone(),
                permalink: entry.item.permalink.clone(),
                reason: classification.reasoning.clone(),
            });
        }

        let verdict = match &outcome {
            ActionOutcome::TransientFailure(msg) => {
                Verdict::skip(format!("action failed: {msg}"), provider)
            }
            _ => Verdict::new(classification.verdict, classification.reasoning, provider),
        };
        let record = self
            .finalize(
                &entry,
                verdict,
                outcome.action_taken(),
                latency_ms,
                Some(classification.usage),
            )
            .await?;
        Ok(Step::Completed(record))
    }

    async fn on_backend_error(
        &self,
        entry: QueueEntry,
        err: BackendError,
        latency_ms: u64,
    ) -> Result<Step> {
        let provider = self.backend.name().to_string();
        match self.policy.decide(&err, entry.attempt_count) {
            RetryDecision::Retry { delay } => {
                let item_id = entry.id().to_string();
                let requeued = self.queue.requeue(entry, delay).inspect_err(|e| {
                    self.persist_failed(e);
                })?;
                warn!(
                    %item_id,
                    attempt = requeued.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "backend call failed, requeued"
                );
                self.events.emit(PipelineEvent::ItemRequeued {
                    item_id,
                    attempt: requeued.attempt_count,
                    delay_ms: delay.as_millis() as u64,
                });
                Ok(Step::Requeued { delay })
            }
            RetryDecision::Exhausted => {
                warn!(
                    item_id = %entry.id(),
                    retries = entry.attempt_count,
                    error = %err,
                    "retries exhausted, skipping"
                );
                let verdict = Verdict::skip(
                    format!("backend unavailable after {} retries: {err}", entry.attempt_count),
                    provider,
                );
                let record = self.finalize(&entry, verdict, false, latency_ms, None).await?;
                Ok(Step::Completed(record))
            }
            RetryDecision::Skip => {
                if let BackendError::Malformed { excerpt, .. } = &err {
                    warn!(item_id = %entry.id(), error = %err, %excerpt, "malformed backend response, skipping");
                }
                let verdict = Verdict::skip(err.to_string(), provider);
                let record = self.finalize(&entry, verdict, false, latency_ms, None).await?;
                Ok(Step::Completed(record))
            }
            RetryDecision::Fatal => {
                let verdict = Verdict::skip(err.to_string(), provider);
                self.finalize(&entry, verdict, false, latency_ms, None).await?;
                self.events.emit(PipelineEvent::Error {
                    stage: Stage::Analyze,
                    message: err.to_string(),
                    fatal: true,
                });
                Err(PipelineError::Backend(err))
            }
        }
    }

    /// Write the audit record, then drop the entry from the queue.
    async fn finalize(
        &self,
        entry: &QueueEntry,
        verdict: Verdict,
        action_taken: bool,
        latency_ms: u64,
        usage: Option<Usage>,
    ) -> Result<AuditRecord> {
        let item = &entry.item;
        let record = AuditRecord {
            item_id: item.id.clone(),
            verdict: verdict.kind,
            action_taken,
            timestamp: self.clock.now(),
            provider: verdict.provider,
            latency_ms,
            reasoning: verdict.reasoning,
            attempts: entry.attempt_count,
            author: Some(item.author.clone()),
            permalink: (!item.permalink.is_empty()).then(|| item.permalink.clone()),
            usage,
        };

        match self.audit.record(&record).await {
            Ok(()) => {}
            Err(PersistenceError::DuplicateAudit(id)) => {
                warn!(item_id = %id, "audit record already present");
            }
            Err(e) => {
                self.persist_failed(&e);
                return Err(e.into());
            }
        }
        self.complete(&item.id)?;

        if record.verdict == VerdictKind::Act {
            info!(
                item_id = %record.item_id,
                author = %item.author,
                action_taken,
                "comment flagged for removal"
            );
        }
        self.events.emit(PipelineEvent::ItemClassified {
            item_id: record.item_id.clone(),
            verdict: record.verdict,
            provider: record.provider.clone(),
            latency_ms,
        });
        Ok(record)
    }

    fn complete(&self, id: &str) -> Result<()> {
        self.queue.complete(id).inspect_err(|e| self.persist_failed(e))?;
        Ok(())
    }

    fn persist_failed(&self, err: &PersistenceError) {
        self.events.emit(PipelineEvent::Error {
            stage: Stage::Persist,
            message: err.to_string(),
            fatal: true,
        });
    }

    /// Process until nothing is pending, sleeping (through the clock) over
    /// delayed entries. Returns the number of entries completed.
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut completed = 0;
        while !cancel.is_cancelled() {
            match self.process_next(cancel).await? {
                Step::Completed(_) | Step::AlreadyAudited => completed += 1,
                Step::Requeued { .. } => {}
                Step::Released => break,
                Step::Idle(Some(wait)) if wait.is_zero() => tokio::task::yield_now().await,
                Step::Idle(Some(wait)) => self.clock.sleep(wait).await,
                Step::Idle(None) => break,
            }
        }
        Ok(completed)
    }

    /// Consume the queue until cancelled or a fatal error occurs.
    ///
    /// An in-flight classify or action runs to completion on cancel; an
    /// entry waiting for rate budget is released back to the queue.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(provider = %self.backend.name(), "pipeline started");
        while !cancel.is_cancelled() {
            let Step::Idle(next) = self.process_next(&cancel).await? else {
                continue;
            };
            let wait_for_delayed = async {
                match next {
                    Some(d) => self.clock.sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.queue.notified() => {}
                _ = wait_for_delayed => {}
            }
        }
        info!("pipeline stopped");
        Ok(())
    }
}
