//! Deterministic content hashing of unit directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Result, SubstrateError};

/// Entry names never packaged, hashed or pushed.
const TRANSIENT_NAMES: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".DS_Store",
    ".backups",
];

/// Prefix of the staging directories the engine creates next to units.
pub const STAGING_PREFIX: &str = ".substrate-staging-";

/// Whether a file or directory name is a transient or backup artifact.
#[must_use]
pub fn is_transient(name: &str) -> bool {
    TRANSIENT_NAMES.contains(&name)
        || name.starts_with(STAGING_PREFIX)
        || name.ends_with(".pyc")
        || (name.starts_with('.') && name.ends_with(".tmp"))
}

/// A file belonging to a unit: `/`-separated relative path plus location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFile {
    pub rel: String,
    pub abs: PathBuf,
}

/// Collect every non-transient regular file under `root`, sorted by relative path.
pub fn collect_unit_files(root: &Path) -> Result<Vec<UnitFile>> {
    if !root.is_dir() {
        return Err(SubstrateError::InvalidUnit(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let mut out = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_transient(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        out.push(UnitFile {
            rel: relative_slash_path(root, entry.path())?,
            abs: entry.into_path(),
        });
    }

    out.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(out)
}

fn relative_slash_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|err| SubstrateError::InvalidUnit(format!("{}: {err}", path.display())))?;
    let parts = rel
        .components()
        .map(|c| {
            c.as_os_str().to_str().map(str::to_string).ok_or_else(|| {
                SubstrateError::InvalidUnit(format!("non UTF-8 path: {}", path.display()))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

/// Incremental content hash. Feed files in sorted order.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, rel: &str, data: &[u8]) {
        self.inner.update(rel.as_bytes());
        self.inner.update([0u8]);
        self.inner.update((data.len() as u64).to_le_bytes());
        self.inner.update(data);
    }

    #[must_use]
    pub fn finish(self) -> String {
        format!("sha256:{}", hex::encode(self.inner.finalize()))
    }
}

/// Hash the unit rooted at `root`.
pub fn hash_unit(root: &Path) -> Result<String> {
    let files = collect_unit_files(root)?;
    let mut hasher = ContentHasher::new();
    for file in &files {
        let data = fs::read(&file.abs)?;
        hasher.update(&file.rel, &data);
    }
    Ok(hasher.finish())
}

/// `sha256:<hex>` of a byte slice.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Cheap change detector: file count, byte total and newest modification time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFingerprint {
    pub files: u64,
    pub bytes: u64,
    pub newest_mtime_ms: u128,
}

impl UnitFingerprint {
    /// Fingerprint the unit at `root` from metadata only.
    pub fn of(root: &Path) -> Result<Self> {
        let mut fingerprint = Self::default();
        for file in collect_unit_files(root)? {
            let meta = fs::metadata(&file.abs)?;
            fingerprint.files += 1;
            fingerprint.bytes += meta.len();
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_millis());
            fingerprint.newest_mtime_ms = fingerprint.newest_mtime_ms.max(mtime);
        }
        Ok(fingerprint)
    }
}
