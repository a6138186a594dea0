//! Moderation pipeline for modsentry.
//!
//! Two tasks share one durable queue:
//!
//! - the [`Poller`](poller::Poller) fetches new items from a
//!   [`ContentSource`](source::ContentSource) on a fixed cadence, enqueues
//!   them and advances the [`CheckpointStore`](checkpoint::CheckpointStore);
//! - the [`Pipeline`](pipeline::Pipeline) takes entries one at a time, waits
//!   for [`RateLimiter`](rate_limiter::RateLimiter) budget, classifies through
//!   a `modsentry_llm::Backend`, lets the
//!   [`ActionExecutor`](executor::ActionExecutor) act on ACT verdicts and
//!   writes exactly one [`AuditLog`](audit::AuditLog) record per item.
//!
//! [`ModerationService`](service::ModerationService) opens the persisted
//! state and runs both tasks under one cancellation token. All time reads
//! and waits go through [`Clock`](clock::Clock).

pub mod audit;
pub mod checkpoint;
pub mod clock;
pub mod error;
pub mod events;
pub mod executor;
pub mod filter;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod rate_limiter;
pub mod service;
pub mod source;

mod fsutil;

pub use audit::{AuditLog, AuditStats};
pub use checkpoint::CheckpointStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{PersistenceError, PipelineError, Result};
pub use events::{ChannelSink, EventBus, EventSink, TracingSink};
pub use executor::{ActionExecutor, ActionOutcome};
pub use filter::ItemFilter;
pub use fsutil::write_atomic;
pub use pipeline::{Pipeline, Step};
pub use poller::{Poller, TickReport};
pub use queue::{PersistentQueue, QueueSnapshot};
pub use rate_limiter::RateLimiter;
pub use service::ModerationService;
pub use source::{Action, ContentSource};
