//! Durable FIFO of pending work items.
//!
//! Entries live in two places while the process runs: `pending` (waiting to
//! be handed out, in queue order) and `in_flight` (handed out by `dequeue`,
//! not yet completed). Both are part of the durable snapshot, so an item that
//! was being analyzed when the process died is simply pending again after
//! restart.
//!
//! Every mutation that changes the snapshot is written atomically before the
//! call returns. If the write fails (after bounded retries) the in-memory
//! change is rolled back and [`PersistenceError`] is returned, so memory and
//! disk never disagree.
//!
//! The lock is a `std::sync::Mutex` and is never held across an `.await`.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use modsentry_types::{Item, QueueEntry};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::clock::{Clock, after, until};
use crate::error::PersistenceError;
use crate::fsutil::write_atomic;

/// Current on-disk format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk form of the queue (`queue.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version: u32,
    #[serde(default)]
    pub entries: Vec<SnapshotEntry>,
}

/// One persisted entry. `item_id` duplicates `item.id` for readability of
/// the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub item_id: String,
    #[serde(flatten)]
    pub entry: QueueEntry,
}

#[derive(Debug, Clone, Default)]
struct State {
    pending: VecDeque<QueueEntry>,
    in_flight: Vec<QueueEntry>,
}

impl State {
    fn contains(&self, id: &str) -> bool {
        self.pending.iter().any(|e| e.id() == id) || self.in_flight.iter().any(|e| e.id() == id)
    }

    fn take_in_flight(&mut self, id: &str) -> Option<QueueEntry> {
        let pos = self.in_flight.iter().position(|e| e.id() == id)?;
        Some(self.in_flight.remove(pos))
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            version: SNAPSHOT_VERSION,
            entries: self
                .in_flight
                .iter()
                .chain(self.pending.iter())
                .map(|e| SnapshotEntry {
                    item_id: e.item.id.clone(),
                    entry: e.clone(),
                })
                .collect(),
        }
    }

    /// Everything becomes pending again, in snapshot order, first copy wins.
    fn from_snapshot(snapshot: QueueSnapshot) -> Self {
        let mut seen = HashSet::new();
        let pending = snapshot
            .entries
            .into_iter()
            .map(|s| s.entry)
            .filter(|e| seen.insert(e.item.id.clone()))
            .collect();
        Self {
            pending,
            in_flight: Vec::new(),
        }
    }
}

pub struct PersistentQueue {
    state: Mutex<State>,
    path: Option<PathBuf>,
    write_attempts: u32,
    clock: Arc<dyn Clock>,
    notify: Notify,
}

impl PersistentQueue {
    /// A queue that never touches disk.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            path: None,
            write_attempts: 1,
            clock,
            notify: Notify::new(),
        }
    }

    /// Open (or create) the queue persisted at `path`.
    ///
    /// A missing file is an empty queue; an unreadable or unparseable one is
    /// an error.
    pub fn open(
        path: impl Into<PathBuf>,
        write_attempts: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PersistenceError> {
        let path = path.into();
        let state = match Self::read_snapshot(&path)? {
            Some(snapshot) => {
                let state = State::from_snapshot(snapshot);
                info!(
                    path = %path.display(),
                    entries = state.pending.len(),
                    "restored queue snapshot"
                );
                state
            }
            None => State::default(),
        };
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
            write_attempts,
            clock,
            notify: Notify::new(),
        })
    }

    /// Read a snapshot file without opening a queue (used by `status`).
    pub fn read_snapshot(path: &Path) -> Result<Option<QueueSnapshot>, PersistenceError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(path, e)),
        };
        let snapshot: QueueSnapshot =
            serde_json::from_str(&raw).map_err(|e| PersistenceError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("unsupported snapshot version {}", snapshot.version),
            });
        }
        Ok(Some(snapshot))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to the state and persist; roll back if persisting fails.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T, PersistenceError> {
        let mut state = self.lock();
        let before = state.clone();
        let out = f(&mut state);
        if let Some(path) = &self.path {
            let bytes = serde_json::to_vec_pretty(&state.snapshot())?;
            if let Err(e) = write_atomic(path, &bytes, self.write_attempts) {
                *state = before;
                return Err(e);
            }
        }
        Ok(out)
    }

    /// Add one item. Returns `false` if the id is already pending or in flight.
    pub fn enqueue(&self, item: Item) -> Result<bool, PersistenceError> {
        Ok(self.enqueue_batch(vec![item])? == 1)
    }

    /// Add several items with a single durable write. Ids already present
    /// (or repeated within the batch) are skipped. Returns how many were
    /// added.
    pub fn enqueue_batch(&self, items: Vec<Item>) -> Result<usize, PersistenceError> {
        let now = self.clock.now();
        {
            let state = self.lock();
            if items.iter().all(|i| state.contains(&i.id)) {
                return Ok(0);
            }
        }
        let added = self.mutate(|state| {
            let mut added = 0;
            for item in items {
                if state.contains(&item.id) {
                    debug!(item_id = %item.id, "already queued, skipping");
                    continue;
                }
                state.pending.push_back(QueueEntry::new(item, now));
                added += 1;
            }
            added
        })?;
        if added > 0 {
            self.notify.notify_one();
        }
        Ok(added)
    }

    /// Hand out the first pending entry that is eligible now.
    ///
    /// Entries scheduled for later are skipped over, not waited on. The
    /// returned entry is in flight until `complete`, `requeue` or `release`.
    pub fn dequeue(&self) -> Option<QueueEntry> {
        let now = self.clock.now();
        let mut state = self.lock();
        let pos = state.pending.iter().position(|e| e.is_eligible(now))?;
        let entry = state.pending.remove(pos)?;
        state.in_flight.push(entry.clone());
        Some(entry)
    }

    /// Put an in-flight entry back at the tail, eligible after `delay`, with
    /// its attempt count incremented.
    pub fn requeue(&self, entry: QueueEntry, delay: Duration) -> Result<QueueEntry, PersistenceError> {
        let eligible_at = after(self.clock.now(), delay);
        let requeued = self.mutate(|state| {
            let mut e = state.take_in_flight(entry.id()).unwrap_or(entry);
            e.attempt_count += 1;
            e.next_eligible_at = eligible_at;
            state.pending.push_back(e.clone());
            e
        })?;
        self.notify.notify_one();
        Ok(requeued)
    }

    /// Return an in-flight entry, unchanged, to the head of the queue.
    ///
    /// The snapshot already lists in-flight entries first, so nothing needs
    /// to be written.
    pub fn release(&self, entry: QueueEntry) {
        let mut state = self.lock();
        let e = state.take_in_flight(entry.id()).unwrap_or(entry);
        if !state.contains(e.id()) {
            state.pending.push_front(e);
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Remove an entry permanently. Returns `false` if it was not queued.
    pub fn complete(&self, id: &str) -> Result<bool, PersistenceError> {
        if !self.contains(id) {
            return Ok(false);
        }
        self.mutate(|state| {
            let before = state.pending.len() + state.in_flight.len();
            state.in_flight.retain(|e| e.id() != id);
            state.pending.retain(|e| e.id() != id);
            before != state.pending.len() + state.in_flight.len()
        })
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.lock().snapshot()
    }

    /// Replace the whole queue with `snapshot` (all entries pending) and
    /// persist it.
    pub fn restore(&self, snapshot: QueueSnapshot) -> Result<(), PersistenceError> {
        self.mutate(|state| *state = State::from_snapshot(snapshot))?;
        self.notify.notify_one();
        Ok(())
    }

    /// Time until the earliest pending entry becomes eligible (zero if one
    /// already is), or `None` when nothing is pending.
    pub fn next_eligible_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.lock()
            .pending
            .iter()
            .map(|e| e.next_eligible_at)
            .min()
            .map(|at| until(now, at))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    /// Pending plus in-flight entries.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.pending.len() + state.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves when work may have become available.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;

    fn item(id: &str) -> Item {
        Item {
            id: id.into(),
            body: format!("body of {id}"),
            author: "someone".into(),
            created_at: Utc::now(),
            permalink: String::new(),
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn fifo_order() {
        let q = PersistentQueue::in_memory(clock());
        q.enqueue_batch(vec![item("a"), item("b"), item("c")]).unwrap();
        assert_eq!(q.dequeue().unwrap().id(), "a");
        assert_eq!(q.dequeue().unwrap().id(), "b");
        assert_eq!(q.dequeue().unwrap().id(), "c");
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let q = PersistentQueue::in_memory(clock());
        assert!(q.enqueue(item("a")).unwrap());
        assert!(!q.enqueue(item("a")).unwrap());
        // Still rejected while in flight.
        let e = q.dequeue().unwrap();
        assert!(!q.enqueue(item("a")).unwrap());
        assert_eq!(q.enqueue_batch(vec![item("b"), item("b")]).unwrap(), 1);
        q.complete(e.id()).unwrap();
        assert!(q.enqueue(item("a")).unwrap());
    }

    #[test]
    fn requeue_delays_and_counts() {
        let clock = clock();
        let q = PersistentQueue::in_memory(clock.clone());
        q.enqueue_batch(vec![item("a"), item("b")]).unwrap();
        let a = q.dequeue().unwrap();
        let a = q.requeue(a, Duration::from_secs(2)).unwrap();
        assert_eq!(a.attempt_count, 1);

        // "a" is not eligible yet; "b" is handed out instead.
        assert_eq!(q.dequeue().unwrap().id(), "b");
        assert!(q.dequeue().is_none());
        assert_eq!(q.next_eligible_in(), Some(Duration::from_secs(2)));

        clock.advance(Duration::from_secs(2));
        assert_eq!(q.next_eligible_in(), Some(Duration::ZERO));
        let again = q.dequeue().unwrap();
        assert_eq!(again.id(), "a");
        assert_eq!(again.attempt_count, 1);
    }

    #[test]
    fn release_returns_to_head() {
        let q = PersistentQueue::in_memory(clock());
        q.enqueue_batch(vec![item("a"), item("b")]).unwrap();
        let a = q.dequeue().unwrap();
        q.release(a);
        let first = q.dequeue().unwrap();
        assert_eq!(first.id(), "a");
        assert_eq!(first.attempt_count, 0);
    }

    #[test]
    fn snapshot_includes_in_flight() {
        let q = PersistentQueue::in_memory(clock());
        q.enqueue_batch(vec![item("a"), item("b")]).unwrap();
        let _a = q.dequeue().unwrap();
        let snap = q.snapshot();
        let ids: Vec<_> = snap.entries.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let clock = clock();
        {
            let q = PersistentQueue::open(&path, 3, clock.clone()).unwrap();
            q.enqueue_batch(vec![item("a"), item("b"), item("c")]).unwrap();
            let a = q.dequeue().unwrap();
            q.requeue(a, Duration::from_secs(4)).unwrap();
            let b = q.dequeue().unwrap();
            q.complete(b.id()).unwrap();
            // "c" is dequeued but never completed: simulated crash.
            let _c = q.dequeue().unwrap();
        }
        let q = PersistentQueue::open(&path, 3, clock.clone()).unwrap();
        assert_eq!(q.len(), 2);
        assert!(q.contains("a"));
        assert!(q.contains("c"));
        assert!(!q.contains("b"));
        let snap = q.snapshot();
        let a = snap.entries.iter().find(|e| e.item_id == "a").unwrap();
        assert_eq!(a.entry.attempt_count, 1);
    }

    #[test]
    fn snapshot_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let q = PersistentQueue::open(&path, 3, clock()).unwrap();
        q.enqueue(item("x1")).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        let entry = &raw["entries"][0];
        assert_eq!(entry["item_id"], "x1");
        assert_eq!(entry["item"]["id"], "x1");
        assert_eq!(entry["attempt_count"], 0);
        assert!(entry["enqueued_at"].is_string());
        assert!(entry["next_eligible_at"].is_string());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = PersistentQueue::open(&path, 3, clock()).err().unwrap();
        assert!(matches!(err, PersistenceError::Corrupt { .. }));
    }

    #[test]
    fn failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        // The target path is a non-empty directory, so every rename fails.
        let path = dir.path().join("queue.json");
        std::fs::create_dir_all(path.join("blocker")).unwrap();
        let q = PersistentQueue::open(&path, 2, clock());
        // Opening reads a directory: that is an io error, not a silent empty queue.
        assert!(q.is_err());

        let good = dir.path().join("good.json");
        let q = PersistentQueue::open(&good, 2, clock()).unwrap();
        q.enqueue(item("a")).unwrap();
        std::fs::remove_file(&good).unwrap();
        std::fs::create_dir_all(good.join("blocker")).unwrap();
        assert!(q.enqueue(item("b")).is_err());
        assert!(!q.contains("b"));
        assert!(q.contains("a"));
    }

    #[test]
    fn restore_replaces_contents() {
        let q = PersistentQueue::in_memory(clock());
        q.enqueue(item("old")).unwrap();
        let other = PersistentQueue::in_memory(clock());
        other.enqueue_batch(vec![item("n1"), item("n2")]).unwrap();
        q.restore(other.snapshot()).unwrap();
        assert!(!q.contains("old"));
        assert_eq!(q.len(), 2);
    }
}
