//! Append-only JSONL audit log.
//!
//! One [`AuditRecord`] per line, one line per processed item. The log is the
//! authority on "already processed": on open every line is replayed to
//! rebuild the id set, and `record` refuses a second line for the same id.
//!
//! Lines that fail to parse on replay are logged and skipped; a torn final
//! line after a crash must not prevent startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use modsentry_types::{AuditRecord, VerdictKind};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::PersistenceError;

/// Running totals over every record in the log.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AuditStats {
    pub processed: u64,
    pub act: u64,
    pub no_act: u64,
    pub skip: u64,
    pub actions_taken: u64,
    /// Sum of `usage.estimated_cost` (USD).
    pub total_cost: f64,
}

impl AuditStats {
    fn add(&mut self, rec: &AuditRecord) {
        self.processed += 1;
        match rec.verdict {
            VerdictKind::Act => self.act += 1,
            VerdictKind::NoAct => self.no_act += 1,
            VerdictKind::Skip => self.skip += 1,
        }
        if rec.action_taken {
            self.actions_taken += 1;
        }
        if let Some(usage) = rec.usage {
            self.total_cost += usage.estimated_cost;
        }
    }

    /// Share of processed items classified ACT, in percent.
    pub fn removal_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.act as f64 / self.processed as f64 * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    ids: HashSet<String>,
    stats: AuditStats,
}

#[derive(Debug)]
pub struct AuditLog {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            path: None,
        }
    }

    /// Open the log at `path`, replaying existing lines.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let mut inner = Inner::default();
        for rec in Self::replay(&path).await? {
            if inner.ids.insert(rec.item_id.clone()) {
                inner.stats.add(&rec);
            } else {
                warn!(item_id = %rec.item_id, "duplicate audit line on replay, ignoring");
            }
        }
        debug!(path = %path.display(), records = inner.stats.processed, "audit log replayed");
        Ok(Self {
            inner: Mutex::new(inner),
            path: Some(path),
        })
    }

    async fn replay(path: &Path) -> Result<Vec<AuditRecord>, PersistenceError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(path, e)),
        };
        let mut records = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(line) {
                Ok(rec) => records.push(rec),
                Err(e) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping unreadable audit line"
                ),
            }
        }
        Ok(records)
    }

    /// Append one record. Fails with [`PersistenceError::DuplicateAudit`] if
    /// the item already has a record; nothing is written in that case.
    pub async fn record(&self, rec: &AuditRecord) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().await;
        if inner.ids.contains(&rec.item_id) {
            return Err(PersistenceError::DuplicateAudit(rec.item_id.clone()));
        }
        if let Some(path) = &self.path {
            let mut line = serde_json::to_string(rec)?;
            line.push('\n');
            append(path, line.as_bytes())
                .await
                .map_err(|e| PersistenceError::io(path, e))?;
        }
        inner.ids.insert(rec.item_id.clone());
        inner.stats.add(rec);
        Ok(())
    }

    pub async fn contains(&self, item_id: &str) -> bool {
        self.inner.lock().await.ids.contains(item_id)
    }

    pub async fn stats(&self) -> AuditStats {
        self.inner.lock().await.stats
    }

    /// Aggregate a log file without opening it for writing.
    pub async fn stats_of(path: &Path) -> Result<AuditStats, PersistenceError> {
        let mut stats = AuditStats::default();
        let mut seen = HashSet::new();
        for rec in Self::replay(path).await? {
            if seen.insert(rec.item_id.clone()) {
                stats.add(&rec);
            }
        }
        Ok(stats)
    }

    /// The last `n` readable records of the log at `path`, oldest first.
    pub async fn tail(path: &Path, n: usize) -> Result<Vec<AuditRecord>, PersistenceError> {
        let mut records = Self::replay(path).await?;
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

async fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut opts = tokio::fs::OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    opts.mode(0o600);
    let mut file = opts.open(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await
}
