//! Wires the durable state, the poller and the pipeline together.

use std::sync::Arc;
use std::time::Duration;

use modsentry_llm::{Backend, FailureClass, RetryPolicy, Ruleset};
use modsentry_types::{Config, PipelineEvent, Stage};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::checkpoint::CheckpointStore;
use crate::clock::Clock;
use crate::error::{PipelineError, Result};
use crate::events::EventBus;
use crate::executor::ActionExecutor;
use crate::filter::ItemFilter;
use crate::pipeline::Pipeline;
use crate::poller::Poller;
use crate::queue::PersistentQueue;
use crate::rate_limiter::RateLimiter;
use crate::source::ContentSource;

pub struct ModerationService {
    poller: Arc<Poller>,
    pipeline: Arc<Pipeline>,
    backend: Arc<dyn Backend>,
    queue: Arc<PersistentQueue>,
    checkpoint: Arc<CheckpointStore>,
    audit: Arc<AuditLog>,
    events: EventBus,
    source_id: String,
    safe_mode: bool,
}

impl ModerationService {
    /// Load persisted state from `config.state` and build both tasks.
    ///
    /// Any unreadable state file fails here, before anything runs.
    pub async fn open(
        config: &Config,
        source: Arc<dyn ContentSource>,
        backend: Arc<dyn Backend>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate_values()?;

        let state = &config.state;
        let queue = Arc::new(PersistentQueue::open(
            state.queue_path(),
            state.write_attempts,
            clock.clone(),
        )?);
        let checkpoint = Arc::new(CheckpointStore::open(
            state.checkpoint_path(),
            state.write_attempts,
        )?);
        let audit = Arc::new(AuditLog::open(state.audit_path()).await?);

        // Entries left over from a run that crashed between writing the audit
        // line and completing the entry.
        let mut healed = 0;
        for entry in queue.snapshot().entries {
            if audit.contains(&entry.item_id).await && queue.complete(&entry.item_id)? {
                healed += 1;
            }
        }
        if healed > 0 {
            info!(healed, "completed queue entries that were already audited");
        }

        let policy = RetryPolicy::from(&config.retry);
        let source_id = config.source.subreddit.clone();

        let poller = Arc::new(Poller::new(
            source.clone(),
            source_id.clone(),
            queue.clone(),
            checkpoint.clone(),
            audit.clone(),
            events.clone(),
            clock.clone(),
            policy.clone(),
            config.retry.source_max_retries,
            Duration::from_secs(config.poll.interval_secs),
        ));

        let executor = Arc::new(ActionExecutor::new(
            source,
            config.moderation.safe_mode,
            clock.clone(),
            policy.clone(),
            config.retry.source_max_retries,
            Duration::from_secs(config.moderation.action_timeout_secs),
        ));

        let pipeline = Arc::new(Pipeline::new(
            queue.clone(),
            audit.clone(),
            backend.clone(),
            Ruleset::from_override(config.backend.ruleset.as_deref()),
            Arc::new(RateLimiter::new(&config.rate_limit, clock.clone())),
            executor,
            ItemFilter::new(config.source.username.clone(), config.moderation.clone()),
            policy,
            events.clone(),
            clock,
            Duration::from_secs(config.backend.timeout_secs),
        ));

        Ok(Self {
            poller,
            pipeline,
            backend,
            queue,
            checkpoint,
            audit,
            events,
            source_id,
            safe_mode: config.moderation.safe_mode,
        })
    }

    /// Probe the backend once. Configuration problems abort; an unreachable
    /// backend is only a warning since items will be retried.
    pub async fn check_backend(&self) -> Result<()> {
        match self.backend.check_health().await {
            Ok(()) => {
                info!(provider = %self.backend.name(), "backend healthy");
                Ok(())
            }
            Err(e) if e.class() == FailureClass::FatalConfig => {
                self.events.emit(PipelineEvent::Error {
                    stage: Stage::Startup,
                    message: e.to_string(),
                    fatal: true,
                });
                Err(e.into())
            }
            Err(e) => {
                warn!(provider = %self.backend.name(), error = %e, "backend health check failed, continuing");
                Ok(())
            }
        }
    }

    /// Check the backend, then run poller and pipeline until `cancel` fires
    /// or either task fails. A failure in one stops the other.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.check_backend().await?;

        self.events.emit(PipelineEvent::ServiceStarted {
            provider: self.backend.name().to_string(),
            source_id: self.source_id.clone(),
            safe_mode: self.safe_mode,
        });
        if self.safe_mode {
            info!("safe mode: no removals will be sent");
        }

        let stop = cancel.child_token();
        let mut poll_task = tokio::spawn({
            let poller = self.poller.clone();
            let token = stop.clone();
            async move { poller.run(token).await }
        });
        let mut pipe_task = tokio::spawn({
            let pipeline = self.pipeline.clone();
            let token = stop.clone();
            async move { pipeline.run(token).await }
        });

        let (first, poller_done) = tokio::select! {
            r = &mut poll_task => (finish("poller", r), true),
            r = &mut pipe_task => (finish("pipeline", r), false),
        };
        stop.cancel();
        let second = if poller_done {
            finish("pipeline", pipe_task.await)
        } else {
            finish("poller", poll_task.await)
        };

        self.events.emit(PipelineEvent::ServiceStopped);
        first.and(second)
    }

    pub fn queue(&self) -> &Arc<PersistentQueue> {
        &self.queue
    }

    pub fn checkpoint(&self) -> &Arc<CheckpointStore> {
        &self.checkpoint
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

fn finish(task: &'static str, joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    let r = joined.map_err(|e| PipelineError::Task(format!("{task}: {e}"))).and_then(|r| r);
    if let Err(e) = &r {
        error!(task, error = %e, "task failed, stopping service");
    }
    r
}
