use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bundler::{UnitFingerprint, hash_unit};
use crate::error::{Result, SubstrateError};
use crate::utils::fs::{read_optional, write_atomic};

pub const STATE_FILE: &str = "sync_state.json";

/// How the local copy of a unit last reached agreement with the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOrigin {
    Push,
    Pull,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitRecord {
    pub hash: String,
    #[serde(default)]
    pub fingerprint: Option<UnitFingerprint>,
    pub origin: SyncOrigin,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UnitSyncStatus {
    InSync,
    LocalDrift,
    RemoteAhead,
    Diverged,
    Untracked,
    Missing,
    RemoteOnly,
}

impl UnitSyncStatus {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::InSync => "in sync",
            Self::LocalDrift => "local drift",
            Self::RemoteAhead => "remote ahead",
            Self::Diverged => "diverged",
            Self::Untracked => "untracked",
            Self::Missing => "missing locally",
            Self::RemoteOnly => "remote only",
        }
    }
}

/// A push whose commit exists in the store copy but never reached the remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnpublishedPush {
    pub revision: String,
    pub pushed_at: DateTime<Utc>,
    /// Unit name to the content hash committed for it.
    pub units: BTreeMap<String, String>,
}

/// Per-workspace record of the last push and pull.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    #[serde(default)]
    pub last_push: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_pull: Option<DateTime<Utc>>,
    /// Store revision observed by the last successful run.
    #[serde(default)]
    pub last_source_reference: Option<String>,
    #[serde(default)]
    pub units: BTreeMap<String, UnitRecord>,
    /// Set while a committed push waits for `--retry-publish` or the next push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpublished: Option<UnpublishedPush>,
}

impl SyncState {
    #[must_use]
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(STATE_FILE)
    }

    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = Self::path(state_dir);
        let Some(raw) = read_optional(&path)? else {
            return Ok(Self::default());
        };
        serde_json::from_str(&raw)
            .map_err(|err| SubstrateError::Config(format!("read sync state {}: {err}", path.display())))
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let rendered = serde_json::to_string_pretty(self)?;
        write_atomic(&Self::path(state_dir), rendered.as_bytes())
    }

    /// Hash recorded for `name` at its last sync, if any.
    #[must_use]
    pub fn tracked_hash(&self, name: &str) -> Option<&str> {
        self.units.get(name).map(|record| record.hash.as_str())
    }

    pub fn record(
        &mut self,
        name: &str,
        hash: String,
        fingerprint: Option<UnitFingerprint>,
        origin: SyncOrigin,
        at: DateTime<Utc>,
    ) {
        self.units.insert(
            name.to_string(),
            UnitRecord {
                hash,
                fingerprint,
                origin,
                synced_at: at,
            },
        );
    }

    /// Remember units committed by a push whose publish failed. Units from an
    /// earlier unpublished commit stay listed until something publishes them.
    pub fn remember_unpublished(
        &mut self,
        revision: String,
        pushed_at: DateTime<Utc>,
        units: impl IntoIterator<Item = (String, String)>,
    ) {
        let mut merged = self.unpublished.take().map(|p| p.units).unwrap_or_default();
        merged.extend(units);
        self.unpublished = Some(UnpublishedPush {
            revision,
            pushed_at,
            units: merged,
        });
    }

    /// Record the units of a now-published commit as pushed. A unit whose
    /// local copy moved on keeps the pushed hash but no fingerprint, so the
    /// next status re-hashes it.
    pub fn settle_unpublished(&mut self, install_dir: &Path, at: DateTime<Utc>) -> Result<()> {
        let Some(pending) = self.unpublished.take() else {
            return Ok(());
        };
        for (name, hash) in pending.units {
            let path = install_dir.join(&name);
            let fingerprint = if path.is_dir() && hash_unit(&path)? == hash {
                UnitFingerprint::of(&path).ok()
            } else {
                None
            };
            self.record(&name, hash, fingerprint, SyncOrigin::Push, at);
        }
        Ok(())
    }
}

/// Current hash of a local unit, reusing the recorded hash when the
/// fingerprint is unchanged since the last sync.
pub fn current_hash(unit_path: &Path, record: Option<&UnitRecord>) -> Result<String> {
    if let Some(record) = record
        && let Some(recorded) = record.fingerprint
        && UnitFingerprint::of(unit_path)? == recorded
    {
        return Ok(record.hash.clone());
    }
    hash_unit(unit_path)
}

/// Classify a unit from its local hash, its record and (optionally) the
/// store's hash.
#[must_use]
pub fn classify(
    local_hash: Option<&str>,
    record: Option<&UnitRecord>,
    remote_hash: Option<&str>,
    remote_checked: bool,
) -> UnitSyncStatus {
    match (local_hash, record) {
        (None, None) => UnitSyncStatus::RemoteOnly,
        (None, Some(_)) => UnitSyncStatus::Missing,
        (Some(local), None) => {
            if remote_hash == Some(local) {
                UnitSyncStatus::InSync
            } else {
                UnitSyncStatus::Untracked
            }
        }
        (Some(local), Some(record)) => {
            let drifted = local != record.hash;
            let remote_moved =
                remote_checked && remote_hash.is_some_and(|remote| remote != record.hash);
            match (drifted, remote_moved) {
                (false, false) => UnitSyncStatus::InSync,
                (true, false) => UnitSyncStatus::LocalDrift,
                (false, true) => UnitSyncStatus::RemoteAhead,
                (true, true) if remote_hash == Some(local) => UnitSyncStatus::InSync,
                (true, true) => UnitSyncStatus::Diverged,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(hash: &str) -> UnitRecord {
        UnitRecord {
            hash: hash.to_string(),
            fingerprint: None,
            origin: SyncOrigin::Pull,
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn default_sync_state_empty() {
        let state = SyncState::default();
        assert!(state.units.is_empty());
        assert!(state.last_push.is_none());
    }

    #[test]
    fn save_and_reload() {
        let temp = TempDir::new().unwrap();
        let mut state = SyncState {
            last_pull: Some(Utc::now()),
            last_source_reference: Some("abc123".into()),
            ..SyncState::default()
        };
        state.record("foo", "sha256:11".into(), None, SyncOrigin::Pull, Utc::now());
        state.save(temp.path()).unwrap();

        let loaded = SyncState::load(temp.path()).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.tracked_hash("foo"), Some("sha256:11"));
    }

    #[test]
    fn unpublished_units_merge_then_settle() {
        let temp = TempDir::new().unwrap();
        let unit = temp.path().join("alpha");
        std::fs::create_dir(&unit).unwrap();
        std::fs::write(unit.join("SKILL.md"), "alpha").unwrap();
        let alpha = hash_unit(&unit).unwrap();

        let mut state = SyncState::default();
        state.remember_unpublished("rev-1".into(), Utc::now(), [("alpha".to_string(), alpha.clone())]);
        state.remember_unpublished(
            "rev-2".into(),
            Utc::now(),
            [("beta".to_string(), "sha256:beta".to_string())],
        );
        let pending = state.unpublished.clone().unwrap();
        assert_eq!(pending.revision, "rev-2");
        assert_eq!(pending.units.len(), 2);

        state.settle_unpublished(temp.path(), Utc::now()).unwrap();
        assert!(state.unpublished.is_none());
        assert_eq!(state.tracked_hash("alpha"), Some(alpha.as_str()));
        assert!(state.units["alpha"].fingerprint.is_some());
        // beta is not on disk: recorded without a fingerprint.
        assert_eq!(state.tracked_hash("beta"), Some("sha256:beta"));
        assert!(state.units["beta"].fingerprint.is_none());
    }

    #[test]
    fn missing_state_is_default() {
        let temp = TempDir::new().unwrap();
        assert_eq!(SyncState::load(temp.path()).unwrap(), SyncState::default());
    }

    #[test]
    fn current_hash_reuses_record_when_fingerprint_matches() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("SKILL.md"), "body").unwrap();
        let fingerprint = UnitFingerprint::of(temp.path()).unwrap();
        let stale = UnitRecord {
            hash: "sha256:recorded".into(),
            fingerprint: Some(fingerprint),
            origin: SyncOrigin::Push,
            synced_at: Utc::now(),
        };
        assert_eq!(current_hash(temp.path(), Some(&stale)).unwrap(), "sha256:recorded");

        std::fs::write(temp.path().join("extra.md"), "more").unwrap();
        let fresh = current_hash(temp.path(), Some(&stale)).unwrap();
        assert_eq!(fresh, hash_unit(temp.path()).unwrap());
    }

    #[test]
    fn classify_local_only() {
        let tracked = record("sha256:h1");
        assert_eq!(
            classify(Some("sha256:h1"), Some(&tracked), None, false),
            UnitSyncStatus::InSync
        );
        assert_eq!(
            classify(Some("sha256:h2"), Some(&tracked), None, false),
            UnitSyncStatus::LocalDrift
        );
        assert_eq!(
            classify(Some("sha256:h2"), None, None, false),
            UnitSyncStatus::Untracked
        );
        assert_eq!(classify(None, Some(&tracked), None, false), UnitSyncStatus::Missing);
    }

    #[test]
    fn classify_with_remote() {
        let tracked = record("sha256:h1");
        assert_eq!(
            classify(Some("sha256:h1"), Some(&tracked), Some("sha256:h3"), true),
            UnitSyncStatus::RemoteAhead
        );
        assert_eq!(
            classify(Some("sha256:h2"), Some(&tracked), Some("sha256:h3"), true),
            UnitSyncStatus::Diverged
        );
        assert_eq!(
            classify(Some("sha256:h2"), Some(&tracked), Some("sha256:h1"), true),
            UnitSyncStatus::LocalDrift
        );
        assert_eq!(classify(None, None, Some("sha256:h1"), true), UnitSyncStatus::RemoteOnly);
    }
}
