//! Event fan-out for observers of the pipeline.
//!
//! An [`EventBus`] holds any number of [`EventSink`]s. Emitting is
//! synchronous and must never block: the channel sink uses `try_send` and
//! drops events (counting them) when its buffer is full.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use modsentry_types::PipelineEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// Default buffer for [`ChannelSink`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::ServiceStarted {
                provider,
                source_id,
                safe_mode,
            } => info!(%provider, %source_id, safe_mode, "service started"),
            PipelineEvent::ServiceStopped => info!("service stopped"),
            PipelineEvent::TickStarted { since } => {
                debug!(since = ?since, "poll tick started")
            }
            PipelineEvent::TickCompleted {
                fetched,
                enqueued,
                checkpoint,
            } => info!(fetched, enqueued, checkpoint = ?checkpoint, "poll tick completed"),
            PipelineEvent::ItemEnqueued { item_id } => debug!(%item_id, "item enqueued"),
            PipelineEvent::ItemClassified {
                item_id,
                verdict,
                provider,
                latency_ms,
            } => info!(%item_id, %verdict, %provider, latency_ms, "item classified"),
            PipelineEvent::ItemRequeued {
                item_id,
                attempt,
                delay_ms,
            } => warn!(%item_id, attempt, delay_ms, "item requeued for retry"),
            PipelineEvent::ActionTaken { item_id, outcome } => {
                info!(%item_id, %outcome, "action handled")
            }
            PipelineEvent::RateLimited { wait_ms } => debug!(wait_ms, "rate limited"),
            PipelineEvent::Error {
                stage,
                message,
                fatal: true,
            } => error!(stage = ?stage, %message, "fatal pipeline error"),
            PipelineEvent::Error { stage, message, .. } => {
                warn!(stage = ?stage, %message, "pipeline error")
            }
            other => debug!(kind = other.kind(), "pipeline event"),
        }
    }
}

/// Forwards events into a bounded tokio channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<PipelineEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &PipelineEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n.is_power_of_two() {
                    warn!(dropped = n, "event channel full, dropping events");
                }
            }
            // Receiver gone: nobody is listening.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Cheap-to-clone set of sinks.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Arc<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that logs through `tracing`.
    pub fn tracing() -> Self {
        Self::new().with_sink(Arc::new(TracingSink))
    }

    pub fn with_sink(self, sink: Arc<dyn EventSink>) -> Self {
        let mut sinks: Vec<_> = self.sinks.iter().cloned().collect();
        sinks.push(sink);
        Self {
            sinks: Arc::new(sinks),
        }
    }

    pub fn emit(&self, event: PipelineEvent) {
        for sink in self.sinks.iter() {
            sink.emit(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
