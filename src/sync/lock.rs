use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SubstrateError};

/// Advisory cross-process lock serialising operations on one workspace.
///
/// Released when dropped.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

/// Information about the current lock holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub hostname: String,
}

impl WorkspaceLock {
    /// Acquire the lock at `path`. With `wait` this blocks until the holder
    /// releases it; otherwise a held lock is reported as `LockHeld`.
    pub fn acquire(path: &Path, wait: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| SubstrateError::LockFailed(format!("open {}: {e}", path.display())))?;

        if wait {
            file.lock_exclusive()
                .map_err(|e| SubstrateError::LockFailed(format!("acquire lock: {e}")))?;
        } else {
            match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    let holder = read_holder(&mut file)
                        .map(|h| format!("pid {} on {} since {}", h.pid, h.hostname, h.acquired_at))
                        .unwrap_or_else(|| path.display().to_string());
                    return Err(SubstrateError::LockHeld(holder));
                }
                Err(e) => {
                    return Err(SubstrateError::LockFailed(format!("try lock: {e}")));
                }
            }
        }

        let holder = LockHolder {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
        };
        write_holder(&mut file, &holder)?;

        debug!(path = %path.display(), "acquired workspace lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("failed to release workspace lock: {e}");
        }
        debug!(path = %self.path.display(), "released workspace lock");
    }
}

fn read_holder(file: &mut File) -> Option<LockHolder> {
    let mut raw = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut raw).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_holder(file: &mut File, holder: &LockHolder) -> Result<()> {
    let json = serde_json::to_vec(holder)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_fast() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ws.lock");
        let first = WorkspaceLock::acquire(&path, false).unwrap();
        let err = WorkspaceLock::acquire(&path, false).unwrap_err();
        match err {
            SubstrateError::LockHeld(holder) => {
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("expected LockHeld, got {other:?}"),
        }
        drop(first);
        WorkspaceLock::acquire(&path, false).unwrap();
    }

    #[test]
    fn holder_info_is_recorded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/ws.lock");
        let lock = WorkspaceLock::acquire(&path, true).unwrap();
        let raw = std::fs::read_to_string(lock.path()).unwrap();
        let holder: LockHolder = serde_json::from_str(&raw).unwrap();
        assert_eq!(holder.pid, std::process::id());
    }
}
