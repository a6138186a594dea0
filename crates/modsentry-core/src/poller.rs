//! Producer task: fetch new items on a fixed cadence and enqueue them.
//!
//! One tick:
//! 1. read the checkpoint `T`;
//! 2. list items created after `T` (transient source errors retried with
//!    backoff; a tick that still fails leaves the checkpoint untouched);
//! 3. drop anything not strictly newer than `T`, sort by creation time;
//! 4. drop ids already queued or already audited;
//! 5. enqueue the rest with one durable write;
//! 6. advance the checkpoint to the newest fetched `created_at`.
//!
//! The checkpoint moves only after the items it covers are durably queued,
//! so a crash between 5 and 6 re-fetches and dedupes rather than losing
//! items.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use modsentry_llm::RetryPolicy;
use modsentry_types::{PipelineEvent, Stage};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::checkpoint::CheckpointStore;
use crate::clock::Clock;
use crate::error::{PipelineError, Result};
use crate::events::EventBus;
use crate::queue::PersistentQueue;
use crate::source::{ContentSource, retry_source};

/// Summary of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub enqueued: usize,
    pub checkpoint: Option<DateTime<Utc>>,
}

pub struct Poller {
    source: Arc<dyn ContentSource>,
    source_id: String,
    queue: Arc<PersistentQueue>,
    checkpoint: Arc<CheckpointStore>,
    audit: Arc<AuditLog>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    max_retries: u32,
    interval: Duration,
}

impl Poller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn ContentSource>,
        source_id: impl Into<String>,
        queue: Arc<PersistentQueue>,
        checkpoint: Arc<CheckpointStore>,
        audit: Arc<AuditLog>,
        events: EventBus,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        max_retries: u32,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            queue,
            checkpoint,
            audit,
            events,
            clock,
            policy,
            max_retries,
            interval,
        }
    }

    /// Run a single tick.
    pub async fn poll_once(&self) -> Result<TickReport> {
        let since = self.checkpoint.get();
        self.events.emit(PipelineEvent::TickStarted { since });

        let fetched = retry_source(
            self.clock.as_ref(),
            &self.policy,
            self.max_retries,
            "list_new_items",
            || self.source.list_new_items(&self.source_id, since),
        )
        .await;

        let mut items = match fetched {
            Ok(items) => items,
            Err(e) => {
                self.events.emit(PipelineEvent::Error {
                    stage: Stage::Poll,
                    message: e.to_string(),
                    fatal: false,
                });
                return Err(PipelineError::Source(e));
            }
        };
        let fetched_count = items.len();

        if let Some(since) = since {
            items.retain(|i| i.created_at > since);
        }
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let newest = items.last().map(|i| i.created_at);

        let mut fresh = Vec::with_capacity(items.len());
        for item in items {
            if self.queue.contains(&item.id) || self.audit.contains(&item.id).await {
                debug!(item_id = %item.id, "already seen, skipping");
                continue;
            }
            fresh.push(item);
        }
        let ids: Vec<String> = fresh.iter().map(|i| i.id.clone()).collect();

        let enqueued = self.queue.enqueue_batch(fresh).inspect_err(|e| {
            self.events.emit(PipelineEvent::Error {
                stage: Stage::Persist,
                message: e.to_string(),
                fatal: true,
            });
        })?;
        for item_id in ids {
            self.events.emit(PipelineEvent::ItemEnqueued { item_id });
        }

        if let Some(ts) = newest {
            self.checkpoint.set(ts).inspect_err(|e| {
                self.events.emit(PipelineEvent::Error {
                    stage: Stage::Persist,
                    message: e.to_string(),
                    fatal: true,
                });
            })?;
        }

        let report = TickReport {
            fetched: fetched_count,
            enqueued,
            checkpoint: self.checkpoint.get(),
        };
        self.events.emit(PipelineEvent::TickCompleted {
            fetched: report.fetched,
            enqueued: report.enqueued,
            checkpoint: report.checkpoint,
        });
        Ok(report)
    }

    /// Tick every `interval` until cancelled.
    ///
    /// Source failures end the tick but not the loop. Persistence failures
    /// are returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            source_id = %self.source_id,
            interval_secs = self.interval.as_secs(),
            "poller started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = self.poll_once() => r,
            };

            match tick {
                Ok(_) => {}
                Err(PipelineError::Source(e)) => {
                    warn!(error = %e, "poll failed, will retry next tick");
                }
                Err(e) => return Err(e),
            }
        }

        info!("poller stopped");
        Ok(())
    }
}
