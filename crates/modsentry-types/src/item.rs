//! Content items and their queue representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single piece of content fetched from the source (a comment).
///
/// Immutable once fetched. `id` is the source's stable identifier and is the
/// dedupe key everywhere in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Stable external id (e.g. a Reddit comment id without the `t1_` prefix).
    pub id: String,

    /// Body text to classify.
    pub body: String,

    /// Author name, or `[deleted]` when the account is gone.
    pub author: String,

    /// Creation time reported by the source.
    pub created_at: DateTime<Utc>,

    /// Permalink for operators, relative or absolute.
    #[serde(default)]
    pub permalink: String,
}

impl Item {
    /// Body with newlines and tabs escaped, for single-line log output.
    pub fn clean_body(&self) -> String {
        self.body.replace('\n', "\\n").replace('\t', "\\t")
    }
}

/// An [`Item`] waiting in the work queue.
///
/// `attempt_count` counts backend retries already scheduled for the item;
/// a freshly enqueued entry starts at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The wrapped item.
    pub item: Item,

    /// Number of retries already scheduled.
    #[serde(default)]
    pub attempt_count: u32,

    /// When the item first entered the queue.
    pub enqueued_at: DateTime<Utc>,

    /// The entry is not handed out by `dequeue` before this instant.
    pub next_eligible_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Wrap a freshly fetched item, eligible immediately.
    pub fn new(item: Item, now: DateTime<Utc>) -> Self {
        Self {
            item,
            attempt_count: 0,
            enqueued_at: now,
            next_eligible_at: now,
        }
    }

    /// Convenience accessor for the item id.
    pub fn id(&self) -> &str {
        &self.item.id
    }

    /// Whether the entry may be processed at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at <= now
    }
}
