//! Registry of units known to the shared store (`MANIFEST.json`).
//!
//! On disk the manifest is a single JSON object keyed by unit name:
//!
//! ```json
//! { "foo": { "content_hash": "sha256:..", "pushed_by": "alice",
//!            "pushed_at": "2026-01-01T00:00:00Z", "source_reference": "3f2a.." } }
//! ```
//!
//! The manifest is committed together with the units it describes, so an
//! entry cannot name its own commit. `source_reference` is the store revision
//! the push started from (the parent of the commit that wrote the entry), or
//! `"none"` when the push seeded an empty store.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::is_valid_unit_name;
use crate::error::{Result, SubstrateError};
use crate::utils::fs::{read_optional, write_atomic};

pub const MANIFEST_FILE: &str = "MANIFEST.json";

/// One unit's row in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Map key on disk; filled in on load.
    #[serde(skip)]
    pub name: String,
    pub content_hash: String,
    pub pushed_by: String,
    pub pushed_at: DateTime<Utc>,
    /// Parent revision of the push that wrote this entry.
    pub source_reference: String,
}

/// Ordered mapping from unit name to entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the manifest at `path`. A missing file is an empty manifest.
    pub fn load(path: &Path) -> Result<Self> {
        let Some(raw) = read_optional(path)? else {
            debug!(path = %path.display(), "no manifest yet");
            return Ok(Self::default());
        };
        let corrupt = |reason: String| SubstrateError::ManifestCorrupt {
            path: path.display().to_string(),
            reason,
        };

        let mut manifest: Self = serde_json::from_str(&raw).map_err(|err| corrupt(err.to_string()))?;
        for (name, entry) in &mut manifest.entries {
            if !is_valid_unit_name(name) {
                return Err(corrupt(format!("invalid unit name {name:?}")));
            }
            name.clone_into(&mut entry.name);
        }
        Ok(manifest)
    }

    /// Persist atomically: write to a temporary sibling, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut rendered = serde_json::to_string_pretty(self)?;
        rendered.push('\n');
        write_atomic(path, rendered.as_bytes())
    }

    /// Insert `entry`, replacing any entry with the same name. Returns the
    /// replaced entry.
    pub fn upsert(&mut self, entry: ManifestEntry) -> Option<ManifestEntry> {
        self.entries.insert(entry.name.clone(), entry)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str, hash: &str, by: &str) -> ManifestEntry {
        ManifestEntry {
            name: name.to_string(),
            content_hash: hash.to_string(),
            pushed_by: by.to_string(),
            pushed_at: Utc::now(),
            source_reference: "root".to_string(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest::load(&temp.path().join(MANIFEST_FILE)).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn malformed_file_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MANIFEST_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let err = Manifest::load(&path).unwrap_err();
        assert!(matches!(err, SubstrateError::ManifestCorrupt { .. }));

        std::fs::write(&path, r#"{"foo": {"content_hash": 3}}"#).unwrap();
        assert!(matches!(
            Manifest::load(&path).unwrap_err(),
            SubstrateError::ManifestCorrupt { .. }
        ));
    }

    #[test]
    fn path_like_names_are_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MANIFEST_FILE);
        std::fs::write(
            &path,
            r#"{"../escape": {"content_hash": "sha256:aa", "pushed_by": "x",
                "pushed_at": "2026-01-01T00:00:00Z", "source_reference": "r"}}"#,
        )
        .unwrap();
        assert!(matches!(
            Manifest::load(&path).unwrap_err(),
            SubstrateError::ManifestCorrupt { .. }
        ));
    }

    #[test]
    fn save_then_load_restores_names() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MANIFEST_FILE);
        let mut manifest = Manifest::new();
        manifest.upsert(entry("beta", "sha256:bb", "bob"));
        manifest.upsert(entry("alpha", "sha256:aa", "alice"));
        manifest.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.find("alpha").unwrap() < raw.find("beta").unwrap());
        assert!(!raw.contains("\"name\""));

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.get("alpha").unwrap().name, "alpha");
        assert_eq!(loaded.names().collect::<Vec<_>>(), vec!["alpha", "beta"]);
    }

    #[test]
    fn upsert_last_writer_wins() {
        let mut manifest = Manifest::new();
        assert!(manifest.upsert(entry("foo", "sha256:11", "alice")).is_none());
        let previous = manifest.upsert(entry("foo", "sha256:22", "bob")).unwrap();
        assert_eq!(previous.pushed_by, "alice");
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.get("foo").unwrap().content_hash, "sha256:22");
    }
}
