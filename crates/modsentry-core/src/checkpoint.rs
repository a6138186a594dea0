//! Durable "last fetched up to" timestamp.
//!
//! Stored as `{"last_check": "<RFC 3339>"}`. The value only moves forward:
//! an attempt to set an earlier timestamp is refused with
//! [`PersistenceError::CheckpointRegression`]. The in-memory value changes
//! only after the file write succeeds.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::fsutil::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CheckpointFile {
    last_check: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CheckpointStore {
    current: Mutex<Option<DateTime<Utc>>>,
    path: Option<PathBuf>,
    write_attempts: u32,
}

impl CheckpointStore {
    pub fn in_memory() -> Self {
        Self {
            current: Mutex::new(None),
            path: None,
            write_attempts: 1,
        }
    }

    /// Open the checkpoint at `path`. A missing file means "no checkpoint".
    pub fn open(path: impl Into<PathBuf>, write_attempts: u32) -> Result<Self, PersistenceError> {
        let path = path.into();
        let current = Self::read(&path)?;
        if let Some(ts) = current {
            info!(path = %path.display(), checkpoint = %ts.to_rfc3339(), "loaded checkpoint");
        }
        Ok(Self {
            current: Mutex::new(current),
            path: Some(path),
            write_attempts,
        })
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Advance the checkpoint to `ts`.
    ///
    /// Returns `Ok(false)` when `ts` equals the current value (nothing
    /// written) and `Ok(true)` when it advanced.
    pub fn set(&self, ts: DateTime<Utc>) -> Result<bool, PersistenceError> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match *current {
            Some(cur) if ts < cur => {
                return Err(PersistenceError::CheckpointRegression {
                    current: cur,
                    proposed: ts,
                });
            }
            Some(cur) if ts == cur => return Ok(false),
            _ => {}
        }
        if let Some(path) = &self.path {
            Self::write(path, ts, self.write_attempts)?;
        }
        debug!(checkpoint = %ts.to_rfc3339(), "checkpoint advanced");
        *current = Some(ts);
        Ok(true)
    }

    /// Read the checkpoint file at `path` without opening a store.
    pub fn read(path: &Path) -> Result<Option<DateTime<Utc>>, PersistenceError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(path, e)),
        };
        let file: CheckpointFile =
            serde_json::from_str(&raw).map_err(|e| PersistenceError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Some(file.last_check))
    }

    /// Unconditionally replace the checkpoint on disk (operator reset).
    ///
    /// This is the only way to move the checkpoint backwards, and it must not
    /// be used while a service holds the file open.
    pub fn overwrite(path: &Path, ts: DateTime<Utc>) -> Result<(), PersistenceError> {
        Self::write(path, ts, 1)
    }

    fn write(path: &Path, ts: DateTime<Utc>, attempts: u32) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(&CheckpointFile { last_check: ts })?;
        write_atomic(path, &bytes, attempts)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn starts_empty_and_advances() {
        let store = CheckpointStore::in_memory();
        assert_eq!(store.get(), None);
        let t = Utc::now();
        assert!(store.set(t).unwrap());
        assert_eq!(store.get(), Some(t));
        assert!(!store.set(t).unwrap());
        assert!(store.set(t + Duration::seconds(1)).unwrap());
    }

    #[test]
    fn refuses_regression() {
        let store = CheckpointStore::in_memory();
        let t = Utc::now();
        store.set(t).unwrap();
        let err = store.set(t - Duration::seconds(1)).unwrap_err();
        assert!(matches!(err, PersistenceError::CheckpointRegression { .. }));
        assert_eq!(store.get(), Some(t));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let t = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        CheckpointStore::open(&path, 3).unwrap().set(t).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["last_check"], "2024-05-01T12:00:00Z");

        let store = CheckpointStore::open(&path, 3).unwrap();
        assert_eq!(store.get(), Some(t));
    }

    #[test]
    fn failed_write_keeps_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let store = CheckpointStore::open(&path, 2).unwrap();
        std::fs::create_dir_all(path.join("blocker")).unwrap();
        assert!(store.set(Utc::now()).is_err());
        assert_eq!(store.get(), None);
    }

    #[test]
    fn overwrite_can_move_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let now = Utc::now();
        CheckpointStore::open(&path, 1).unwrap().set(now).unwrap();
        let earlier = now - Duration::days(1);
        CheckpointStore::overwrite(&path, earlier).unwrap();
        assert_eq!(CheckpointStore::read(&path).unwrap(), Some(earlier));
    }

    #[test]
    fn corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, r#"{"last_check": 12}"#).unwrap();
        assert!(matches!(
            CheckpointStore::read(&path),
            Err(PersistenceError::Corrupt { .. })
        ));
    }
}
