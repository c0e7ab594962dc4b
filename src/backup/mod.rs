//! Timestamped snapshots of local units, taken before they are overwritten.
//!
//! Layout under the backup root:
//!
//! ```text
//! <unit>.<YYYYmmddTHHMMSSZ>[-N]/
//!     backup.json    metadata
//!     unit/          read-only copy of the unit
//! ```
//!
//! Backups are append-only. Nothing here deletes or rewrites one; pruning is
//! left to the user.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bundler::hash_unit;
use crate::error::{Result, SubstrateError};
use crate::utils::fs::{
    copy_dir_recursive, ensure_dir, read_optional, set_tree_readonly, staging_dir_for,
    swap_into_place,
};

const RECORD_FILE: &str = "backup.json";
const UNIT_DIR: &str = "unit";
const MAX_SUFFIX: u32 = 1000;

/// A backup on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupHandle {
    pub id: String,
    pub unit: String,
    pub source_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    pub files: u64,
    pub bytes: u64,
    /// Backup directory; derived from the root, not stored.
    #[serde(skip)]
    pub path: PathBuf,
}

impl BackupHandle {
    /// Directory holding the copied unit.
    #[must_use]
    pub fn unit_path(&self) -> PathBuf {
        self.path.join(UNIT_DIR)
    }
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot the unit at `unit_path`.
    pub fn backup(&self, unit_path: &Path) -> Result<BackupHandle> {
        let unit = unit_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SubstrateError::InvalidUnit(format!("not a unit path: {}", unit_path.display()))
            })?
            .to_string();
        if !unit_path.is_dir() {
            return Err(SubstrateError::UnitNotFound(unit));
        }
        ensure_dir(&self.root)?;

        let created_at = Utc::now();
        let (id, dir) = self.claim_dir(&unit, created_at)?;
        let copy = dir.join(UNIT_DIR);
        let bytes = copy_dir_recursive(unit_path, &copy)?;
        let files = walkdir::WalkDir::new(&copy)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .count() as u64;

        let handle = BackupHandle {
            id,
            unit,
            source_path: unit_path.to_path_buf(),
            created_at,
            content_hash: hash_unit(&copy)?,
            files,
            bytes,
            path: dir,
        };
        let record = serde_json::to_string_pretty(&handle)?;
        std::fs::write(handle.path.join(RECORD_FILE), record)?;
        set_tree_readonly(&handle.path)?;

        info!(
            backup = %handle.id,
            unit = %handle.unit,
            files = handle.files,
            "backed up unit"
        );
        Ok(handle)
    }

    /// Every backup, newest first. Unreadable entries are skipped.
    pub fn list(&self) -> Result<Vec<BackupHandle>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut handles = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match load_handle(&entry.path()) {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {}
                Err(err) => warn!(path = %entry.path().display(), "skipping backup: {err}"),
            }
        }
        handles.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(handles)
    }

    pub fn find(&self, id: &str) -> Result<BackupHandle> {
        validate_backup_id(id)?;
        load_handle(&self.root.join(id))?.ok_or_else(|| SubstrateError::BackupNotFound(id.to_string()))
    }

    /// Copy the backup back over `target`. The restored files are writable;
    /// the backup itself is untouched.
    pub fn restore(&self, handle: &BackupHandle, target: &Path) -> Result<PathBuf> {
        let source = handle.unit_path();
        if !source.is_dir() {
            return Err(SubstrateError::BackupNotFound(handle.id.clone()));
        }
        let staged = staging_dir_for(target)?;
        copy_dir_recursive(&source, staged.path())?;
        let actual = hash_unit(staged.path())?;
        if actual != handle.content_hash {
            return Err(SubstrateError::Integrity {
                unit: handle.unit.clone(),
                expected: handle.content_hash.clone(),
                actual,
            });
        }
        swap_into_place(staged, target)?;
        info!(backup = %handle.id, target = %target.display(), "restored backup");
        Ok(target.to_path_buf())
    }

    /// Create a fresh backup directory. `create_dir` fails on an existing
    /// directory, so two backups never share one.
    fn claim_dir(&self, unit: &str, at: DateTime<Utc>) -> Result<(String, PathBuf)> {
        let base = format!("{unit}.{}", at.format("%Y%m%dT%H%M%SZ"));
        for n in 0..MAX_SUFFIX {
            let id = if n == 0 {
                base.clone()
            } else {
                format!("{base}-{n}")
            };
            let dir = self.root.join(&id);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(id = %id, "backup id taken");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(SubstrateError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free backup id for {base}"),
        )))
    }
}

fn load_handle(dir: &Path) -> Result<Option<BackupHandle>> {
    let Some(raw) = read_optional(dir.join(RECORD_FILE))? else {
        return Ok(None);
    };
    let mut handle: BackupHandle = serde_json::from_str(&raw)?;
    handle.path = dir.to_path_buf();
    Ok(Some(handle))
}

fn validate_backup_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(SubstrateError::BackupNotFound("backup id is empty".to_string()));
    }
    if id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        return Err(SubstrateError::BackupNotFound(format!(
            "backup id contains invalid path characters: {id:?}"
        )));
    }
    Ok(())
}
