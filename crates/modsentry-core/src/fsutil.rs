//! Atomic file replacement for small JSON state files.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::PersistenceError;

/// `<path>.tmp` alongside the target, e.g. `queue.json.tmp`.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_once(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Write `bytes` to `path` through a temp file and rename, retrying up to
/// `attempts` times.
pub fn write_atomic(
    path: &Path,
    bytes: &[u8],
    attempts: u32,
) -> Result<(), PersistenceError> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match write_once(path, bytes) {
            Ok(()) => {
                debug!(path = %path.display(), bytes = bytes.len(), "state file written");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    attempt,
                    attempts,
                    error = %e,
                    "state file write failed"
                );
                last_err = Some(e);
            }
        }
    }
    Err(PersistenceError::io(
        path,
        last_err.unwrap_or_else(|| std::io::Error::other("write not attempted")),
    ))
}
