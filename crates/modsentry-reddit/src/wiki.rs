//! Public removal log kept on a subreddit wiki page.
//!
//! Applied removals reach a [`WikiSink`] on the event bus as
//! [`PipelineEvent::ItemRemoved`]. The sink hands them to a
//! [`WikiPublisher`] task, which appends them to `wiki.json` and rewrites the
//! page once `update_threshold` removals are pending, at most once per
//! `min_update_interval_secs`. A manual publish ignores the interval.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use modsentry_core::clock::after;
use modsentry_core::{Clock, EventSink, PersistenceError, PipelineError, write_atomic};
use modsentry_types::{PipelineEvent, WikiConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::RedditClient;

/// Buffer between the sink and the publisher task.
pub const WIKI_CHANNEL_CAPACITY: usize = 256;

const EDIT_REASON: &str = "Updated removed comments transparency log";
const REDDIT_WEB: &str = "https://www.reddit.com";

/// One removed comment as shown on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiEntry {
    pub removed_at: DateTime<Utc>,
    pub comment_id: String,
    pub body: String,
    pub permalink: String,
    pub context_url: String,
    pub reason: String,
}

impl WikiEntry {
    pub fn new(
        removed_at: DateTime<Utc>,
        comment_id: impl Into<String>,
        body: impl Into<String>,
        permalink: &str,
        reason: impl Into<String>,
    ) -> Self {
        let permalink = absolute_url(permalink);
        Self {
            removed_at,
            comment_id: comment_id.into(),
            body: body.into(),
            context_url: format!("{permalink}?context=3"),
            permalink,
            reason: reason.into(),
        }
    }
}

fn absolute_url(permalink: &str) -> String {
    if permalink.starts_with("http") {
        permalink.to_owned()
    } else {
        format!("{REDDIT_WEB}{permalink}")
    }
}

/// Contents of `wiki.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiLog {
    /// Oldest first.
    #[serde(default)]
    pub entries: Vec<WikiEntry>,
    /// Removals recorded since the log was created or cleared.
    #[serde(default)]
    pub removal_count: u64,
    /// Removals recorded since the page was last published.
    #[serde(default)]
    pub pending: u32,
    #[serde(default)]
    pub last_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_manual_publish: Option<DateTime<Utc>>,
}

/// Durable [`WikiLog`]. The in-memory copy changes only after the file
/// write succeeds.
#[derive(Debug)]
pub struct WikiStore {
    log: Mutex<WikiLog>,
    path: Option<PathBuf>,
    write_attempts: u32,
    max_entries: usize,
}

impl WikiStore {
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            log: Mutex::new(WikiLog::default()),
            path: None,
            write_attempts: 1,
            max_entries: max_entries.max(1),
        }
    }

    /// Open the log at `path`. A missing file is an empty log.
    pub fn open(
        path: impl Into<PathBuf>,
        write_attempts: u32,
        max_entries: usize,
    ) -> Result<Self, PersistenceError> {
        let path = path.into();
        let log = Self::read(&path)?;
        debug!(path = %path.display(), entries = log.entries.len(), "loaded wiki log");
        Ok(Self {
            log: Mutex::new(log),
            path: Some(path),
            write_attempts,
            max_entries: max_entries.max(1),
        })
    }

    /// Read the log at `path` without opening a store.
    pub fn read(path: &Path) -> Result<WikiLog, PersistenceError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(WikiLog::default()),
            Err(e) => {
                return Err(PersistenceError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|e| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn snapshot(&self) -> WikiLog {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Append a removal and return the pending count. A comment already in
    /// the log is not added twice.
    pub fn add(&self, entry: WikiEntry) -> Result<u32, PersistenceError> {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if log.entries.iter().any(|e| e.comment_id == entry.comment_id) {
            debug!(comment_id = %entry.comment_id, "already in wiki log");
            return Ok(log.pending);
        }
        let mut next = log.clone();
        next.entries.push(entry);
        let excess = next.entries.len().saturating_sub(self.max_entries);
        next.entries.drain(..excess);
        next.removal_count += 1;
        next.pending += 1;
        self.commit(&mut log, next)?;
        Ok(log.pending)
    }

    pub fn mark_published(&self, at: DateTime<Utc>, manual: bool) -> Result<(), PersistenceError> {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = log.clone();
        next.pending = 0;
        next.last_published = Some(at);
        if manual {
            next.last_manual_publish = Some(at);
        }
        self.commit(&mut log, next)
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        self.commit(&mut log, WikiLog::default())?;
        info!("wiki log cleared");
        Ok(())
    }

    fn commit(&self, current: &mut WikiLog, next: WikiLog) -> Result<(), PersistenceError> {
        if let Some(path) = &self.path {
            let bytes = serde_json::to_vec_pretty(&next)?;
            write_atomic(path, &bytes, self.write_attempts)?;
        }
        *current = next;
        Ok(())
    }
}

fn display_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Render the page markdown, newest removal first.
pub fn render_page(log: &WikiLog, now: DateTime<Utc>) -> String {
    let mut out = String::from("# Removed Comments\n\n");
    if log.entries.is_empty() {
        out.push_str("No comments have been removed yet.\n\n");
        out.push_str(&format!("**Last Updated:** {}\n", display_time(now)));
        return out;
    }

    out.push_str(&format!("**Total Removed:** {}\n", log.removal_count));
    out.push_str(&format!("**Last Updated:** {}\n\n---\n\n", display_time(now)));

    let mut entries: Vec<&WikiEntry> = log.entries.iter().collect();
    entries.sort_by(|a, b| b.removed_at.cmp(&a.removed_at));
    for (n, entry) in entries.into_iter().enumerate() {
        out.push_str(&format!("## Removed Comment #{}\n", n + 1));
        out.push_str(&format!("**Removed:** {}\n", display_time(entry.removed_at)));
        out.push_str(&format!("**Reason:** {}\n", one_line(&entry.reason)));
        out.push_str(&format!("**Context:** [View Thread]({})\n\n", entry.context_url));
        out.push_str("**Comment Text:**\n\n");
        // Indented code block: the body cannot close it early.
        for line in entry.body.lines() {
            out.push_str("    ");
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("\n---\n\n");
    }
    out
}

fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Forwards applied removals to the publisher task. Never blocks.
pub struct WikiSink {
    tx: mpsc::Sender<WikiEntry>,
    clock: Arc<dyn Clock>,
}

impl WikiSink {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> (Self, mpsc::Receiver<WikiEntry>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, clock }, rx)
    }
}

impl EventSink for WikiSink {
    fn emit(&self, event: &PipelineEvent) {
        let PipelineEvent::ItemRemoved {
            item_id,
            body,
            permalink,
            reason,
        } = event
        else {
            return;
        };
        let entry = WikiEntry::new(self.clock.now(), item_id, body, permalink, reason);
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                warn!(comment_id = %entry.comment_id, "wiki channel full, removal not logged");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Stores removals and republishes the wiki page.
pub struct WikiPublisher {
    client: Arc<RedditClient>,
    store: Arc<WikiStore>,
    subreddit: String,
    config: WikiConfig,
    clock: Arc<dyn Clock>,
}

impl WikiPublisher {
    pub fn new(
        client: Arc<RedditClient>,
        store: Arc<WikiStore>,
        subreddit: impl Into<String>,
        config: WikiConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            store,
            subreddit: subreddit.into(),
            config,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<WikiStore> {
        &self.store
    }

    pub fn page_url(&self) -> String {
        format!("{REDDIT_WEB}/r/{}/wiki/{}", self.subreddit, self.config.page)
    }

    /// Store one removal and publish if enough are pending. Returns whether
    /// the page was rewritten.
    pub async fn record(&self, entry: WikiEntry) -> Result<bool, PipelineError> {
        let pending = self.store.add(entry)?;
        if pending < self.config.update_threshold {
            return Ok(false);
        }
        debug!(pending, threshold = self.config.update_threshold, "wiki update threshold reached");
        self.publish(false).await
    }

    /// Rewrite the page from the stored log. An automatic publish inside the
    /// minimum interval is skipped and returns `Ok(false)`.
    pub async fn publish(&self, manual: bool) -> Result<bool, PipelineError> {
        let now = self.clock.now();
        let log = self.store.snapshot();
        if !manual && let Some(last) = log.last_published {
            let interval = Duration::from_secs(self.config.min_update_interval_secs);
            let next = after(last, interval);
            if now < next {
                let wait_secs = (next - now).num_seconds();
                debug!(wait_secs, "wiki update deferred by minimum interval");
                return Ok(false);
            }
        }

        let content = render_page(&log, now);
        self.client
            .edit_wiki(&self.subreddit, &self.config.page, &content, EDIT_REASON)
            .await?;
        self.store.mark_published(now, manual)?;
        info!(
            page = %self.page_url(),
            entries = log.entries.len(),
            manual,
            "wiki transparency page published"
        );
        Ok(true)
    }

    /// Consume removals until the sink is dropped or `cancel` fires. Entries
    /// already buffered at cancel are stored without publishing.
    pub async fn run(&self, mut rx: mpsc::Receiver<WikiEntry>, cancel: CancellationToken) {
        loop {
            let entry = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(entry) => entry,
                    None => break,
                },
            };
            let comment_id = entry.comment_id.clone();
            if let Err(e) = self.record(entry).await {
                warn!(%comment_id, error = %e, "wiki transparency update failed");
            }
        }

        while let Ok(entry) = rx.try_recv() {
            if let Err(e) = self.store.add(entry) {
                warn!(error = %e, "could not store removal for the wiki log");
            }
        }
    }
}
