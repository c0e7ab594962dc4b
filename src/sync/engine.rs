//! The synchronizer: push, pull and status over a [`Transport`].
//!
//! Push packs local units and stages them into the store's working copy,
//! then commits and publishes once. Pull verifies each store unit, unpacks
//! it into a staging directory beside the install dir and swaps it in,
//! backing up whatever it replaces. Neither touches the other side's files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backup::BackupManager;
use crate::bundler::{Bundle, PackOptions, UnitFingerprint, hash_unit};
use crate::config::Config;
use crate::context::scanner::{ContentUnit, UnitSelection, discover_units};
use crate::error::{Result, SubstrateError};
use crate::transport::Transport;
use crate::utils::fs::{ensure_dir, staging_dir_for, swap_into_place};

use super::journal::{Journal, JournalEvent};
use super::manifest::{MANIFEST_FILE, Manifest, ManifestEntry};
use super::run::{
    ConflictWarning, Decision, RunKind, RunPhase, SyncReport, SyncRun, UnitOutcome,
};
use super::state::{SyncOrigin, SyncState, UnitRecord, UnitSyncStatus, classify, current_hash};

/// Directory in the store holding one subdirectory per unit.
pub const STORE_UNITS_DIR: &str = "Skills";

const COMMIT_LIST_LIMIT: usize = 5;

const STORE_README: &str = "# Substrate store\n\n\
Shared store for substrate. Units live under `Skills/<name>/`; \
`MANIFEST.json` records who pushed each one, when, and its content hash.\n\n\
Edit units in a workspace and run `substrate push`; do not edit this \
repository by hand.\n";

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Explicit unit names; empty means the configured selection.
    pub units: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct PullOptions {
    /// Explicit unit names; empty means every unit in the manifest.
    pub units: Vec<String>,
    pub dry_run: bool,
    pub backup: bool,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            dry_run: false,
            backup: true,
        }
    }
}

/// One row of `status`.
#[derive(Debug, Clone, Serialize)]
pub struct UnitStatusRow {
    pub name: String,
    pub status: UnitSyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracked_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub workspace: PathBuf,
    pub install_dir: PathBuf,
    pub remote_checked: bool,
    pub last_push: Option<DateTime<Utc>>,
    pub last_pull: Option<DateTime<Utc>>,
    pub last_source_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_revision: Option<String>,
    pub units: Vec<UnitStatusRow>,
}

impl StatusReport {
    #[must_use]
    pub fn count(&self, status: UnitSyncStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }
}

/// Result of seeding the store.
#[derive(Debug, Clone, Serialize)]
pub struct SeedReport {
    pub dry_run: bool,
    /// Files that were (or would be) created.
    pub created: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// A unit packed for push, waiting for its turn to be staged.
struct PendingPush {
    index: usize,
    unit: ContentUnit,
    bundle: Bundle,
    decision: Decision,
}

/// A manifest entry selected for pull.
struct PendingPull {
    index: usize,
    entry: ManifestEntry,
    dest: PathBuf,
    decision: Decision,
}

pub struct Synchronizer<'a, T: Transport> {
    config: &'a Config,
    workspace: PathBuf,
    transport: T,
}

impl<'a, T: Transport> Synchronizer<'a, T> {
    pub fn new(config: &'a Config, workspace: impl Into<PathBuf>, transport: T) -> Self {
        Self {
            config,
            workspace: workspace.into(),
            transport,
        }
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn identity(&self) -> &str {
        &self.config.identity.name
    }

    fn install_dir(&self) -> PathBuf {
        self.config.install_dir(&self.workspace)
    }

    fn state_dir(&self) -> PathBuf {
        self.config.state_dir(&self.workspace)
    }

    /// Publish local units to the shared store.
    pub fn push(&self, options: &PushOptions) -> Result<SyncReport> {
        let mut run = SyncRun::new(RunKind::Push, options.dry_run);
        info!(run = %run.run_id(), dry_run = options.dry_run, "push started");

        let local = discover_units(&self.install_dir())?;
        let available: Vec<String> = local.iter().map(|u| u.name.clone()).collect();
        let selection = self.config.export_selection(&options.units);
        let picked = selection.apply(local, |u| u.name.as_str());
        if !selection.explicit.is_empty() && picked.chosen.is_empty() {
            return Err(SubstrateError::NoMatchingUnits {
                requested: selection.explicit,
                available,
            });
        }
        for name in &picked.missing {
            run.warn(format!("unit not found locally: {name}"));
        }

        let store = self.transport.sync_local_copy()?;
        run.advance(RunPhase::StoreSynced)?;
        let base_revision = self.transport.head_revision(&store);
        run.set_base_revision(base_revision.clone());
        let carried = self.transport.has_unpublished(&store)?;
        if carried {
            warn!(revision = ?base_revision, "store copy holds an unpublished commit");
            run.warn(if options.dry_run {
                "an earlier push was committed but never published; the next push publishes it"
            } else {
                "an earlier push was committed but never published; publishing it with this push"
            });
        }

        let manifest_path = store.join(MANIFEST_FILE);
        let mut manifest = Manifest::load(&manifest_path)?;
        run.advance(RunPhase::ManifestLoaded)?;
        let state = SyncState::load(&self.state_dir())?;
        run.advance(RunPhase::Diffing)?;

        let mut pending = Vec::new();
        for unit in picked.chosen {
            let existing = manifest.get(&unit.name);
            let remote_hash = existing.map(|e| e.content_hash.clone());
            let options = PackOptions {
                version: Some(unit.version()),
                exported_from: Some(self.identity().to_string()),
                ..PackOptions::default()
            };
            let bundle = match Bundle::pack(&unit.path, &unit.name, &options) {
                Ok(bundle) => bundle,
                Err(err) => {
                    warn!(unit = %unit.name, error = %err, "failed to pack unit");
                    let decision = if existing.is_some() {
                        Decision::Update
                    } else {
                        Decision::Create
                    };
                    let index = run.add_unit(&unit.name, decision, None, remote_hash);
                    run.settle_failed(index, &err)?;
                    continue;
                }
            };
            let hash = bundle.content_hash().to_string();
            let decision = match existing {
                None => Decision::Create,
                Some(entry) if entry.content_hash == hash => Decision::NoOp,
                Some(_) => Decision::Update,
            };
            if decision == Decision::Update
                && let Some(entry) = existing
                && let Some(conflict) = self.detect_conflict(entry, &state)
            {
                warn!(
                    unit = %conflict.unit,
                    pushed_by = %conflict.pushed_by,
                    "store entry changed since last sync; overwriting"
                );
                run.add_conflict(conflict);
            }
            debug!(unit = %unit.name, ?decision, hash = %hash, "push decision");
            let index = run.add_unit(&unit.name, decision, Some(hash), remote_hash);
            pending.push(PendingPush {
                index,
                unit,
                bundle,
                decision,
            });
        }

        if options.dry_run {
            for item in &pending {
                run.settle(item.index, dry_outcome(item.decision))?;
            }
            run.advance(RunPhase::Completed)?;
            let report = run.finish();
            info!("{}", report.summary_line());
            return Ok(report);
        }

        let changes = pending.iter().any(|p| p.decision != Decision::NoOp);
        if changes {
            run.advance(RunPhase::Applying)?;
        }
        let units_root = store.join(STORE_UNITS_DIR);
        let pushed_at = Utc::now();
        let source_reference = base_revision.clone().unwrap_or_else(|| "none".to_string());
        for item in &pending {
            if item.decision == Decision::NoOp {
                run.settle(item.index, UnitOutcome::NoOp)?;
                continue;
            }
            match stage_into_store(&units_root, &item.unit.name, &item.bundle) {
                Ok(()) => {
                    manifest.upsert(ManifestEntry {
                        name: item.unit.name.clone(),
                        content_hash: item.bundle.content_hash().to_string(),
                        pushed_by: self.identity().to_string(),
                        pushed_at,
                        source_reference: source_reference.clone(),
                    });
                    let outcome = if item.decision == Decision::Create {
                        UnitOutcome::Created
                    } else {
                        UnitOutcome::Updated
                    };
                    run.settle(item.index, outcome)?;
                }
                Err(err) => {
                    warn!(unit = %item.unit.name, error = %err, "failed to stage unit");
                    run.settle_failed(item.index, &err)?;
                }
            }
        }

        let applied = run.applied_names();
        if applied.is_empty() && !carried {
            run.advance(RunPhase::Completed)?;
        } else {
            let revision = if applied.is_empty() {
                run.advance(RunPhase::Committing)?;
                base_revision.clone().ok_or_else(|| {
                    SubstrateError::Transport("unpublished store commit has no revision".into())
                })?
            } else {
                manifest.save(&manifest_path)?;
                run.advance(RunPhase::Committing)?;
                self.transport
                    .commit(&store, &commit_message(self.identity(), &applied))?
            };
            run.set_revision(revision.clone());

            if let Err(err) = self.transport.publish(&store) {
                let committed = pending
                    .iter()
                    .filter(|item| applied.contains(&item.unit.name))
                    .map(|item| (item.unit.name.clone(), item.bundle.content_hash().to_string()));
                let state_dir = self.state_dir();
                let mut state = SyncState::load(&state_dir)?;
                state.remember_unpublished(revision.clone(), pushed_at, committed);
                state.save(&state_dir)?;

                let err = SubstrateError::PublishFailed {
                    revision,
                    reason: err.to_string(),
                };
                warn!(error = %err, "publish failed; commit kept for --retry-publish");
                run.set_published(false);
                run.fail(&err);
                let report = run.finish();
                self.journal(&report);
                return Ok(report);
            }
            run.set_published(true);
            run.advance(RunPhase::Completed)?;
        }

        let report = run.finish();
        self.record_push(&report, &pending, pushed_at, carried)?;
        self.journal(&report);
        info!("{}", report.summary_line());
        Ok(report)
    }

    /// Re-publish the commit left behind by a push whose publish failed.
    pub fn retry_publish(&self) -> Result<SyncReport> {
        let mut run = SyncRun::new(RunKind::Push, false);
        let store = self.transport.local_copy();
        let revision = self.transport.head_revision(&store).ok_or_else(|| {
            SubstrateError::Transport(format!(
                "no local commit to publish in {}",
                store.display()
            ))
        })?;
        run.advance(RunPhase::Committing)?;
        run.set_revision(revision.clone());
        info!(revision = %revision, "retrying publish");

        if let Err(err) = self.transport.publish(&store) {
            let err = SubstrateError::PublishFailed {
                revision,
                reason: err.to_string(),
            };
            run.set_published(false);
            run.fail(&err);
            let report = run.finish();
            self.journal(&report);
            return Ok(report);
        }
        run.set_published(true);
        run.advance(RunPhase::Completed)?;

        let state_dir = self.state_dir();
        let mut state = SyncState::load(&state_dir)?;
        let now = Utc::now();
        state.settle_unpublished(&self.install_dir(), now)?;
        state.last_push = Some(now);
        state.last_source_reference = Some(revision);
        state.save(&state_dir)?;

        let report = run.finish();
        self.journal(&report);
        Ok(report)
    }

    /// Install or update units from the shared store.
    pub fn pull(&self, options: &PullOptions) -> Result<SyncReport> {
        let mut run = SyncRun::new(RunKind::Pull, options.dry_run);
        info!(run = %run.run_id(), dry_run = options.dry_run, "pull started");

        let store = self.transport.sync_local_copy()?;
        run.advance(RunPhase::StoreSynced)?;
        let revision = self.transport.head_revision(&store);
        run.set_base_revision(revision.clone());

        let manifest = Manifest::load(&store.join(MANIFEST_FILE))?;
        run.advance(RunPhase::ManifestLoaded)?;
        let state_dir = self.state_dir();
        let mut state = SyncState::load(&state_dir)?;
        run.advance(RunPhase::Diffing)?;

        let selection = UnitSelection {
            explicit: options.units.clone(),
            exclude: Vec::new(),
            auto_detect: true,
        };
        let entries: Vec<ManifestEntry> = manifest.entries().cloned().collect();
        let picked = selection.apply(entries, |e| e.name.as_str());
        if !selection.explicit.is_empty() && picked.chosen.is_empty() {
            return Err(SubstrateError::NoMatchingUnits {
                requested: selection.explicit,
                available: manifest.names().map(str::to_string).collect(),
            });
        }
        for name in &picked.missing {
            run.warn(format!("unit not in the shared store: {name}"));
        }

        let install_dir = self.install_dir();
        let mut pending = Vec::new();
        for entry in picked.chosen {
            let dest = install_dir.join(&entry.name);
            let record = state.units.get(&entry.name);
            let local_hash = if dest.is_dir() {
                match current_hash(&dest, record) {
                    Ok(hash) => Some(hash),
                    Err(err) => {
                        warn!(unit = %entry.name, error = %err, "cannot hash local unit");
                        let index = run.add_unit(
                            &entry.name,
                            Decision::Update,
                            None,
                            Some(entry.content_hash.clone()),
                        );
                        run.settle_failed(index, &err)?;
                        continue;
                    }
                }
            } else {
                None
            };
            let decision = pull_decision(local_hash.as_deref(), record, &entry.content_hash);
            if decision == Decision::KeepLocal {
                info!(unit = %entry.name, "local edits kept; store unchanged since last sync");
            }
            debug!(unit = %entry.name, ?decision, "pull decision");
            let index = run.add_unit(
                &entry.name,
                decision,
                local_hash,
                Some(entry.content_hash.clone()),
            );
            pending.push(PendingPull {
                index,
                entry,
                dest,
                decision,
            });
        }

        if options.dry_run {
            for item in &pending {
                run.settle(item.index, dry_outcome(item.decision))?;
            }
            run.advance(RunPhase::Completed)?;
            let report = run.finish();
            info!("{}", report.summary_line());
            return Ok(report);
        }

        if pending
            .iter()
            .any(|p| matches!(p.decision, Decision::Create | Decision::Update))
        {
            run.advance(RunPhase::Applying)?;
        }
        let backups = BackupManager::new(self.config.backup_dir(&self.workspace));
        let now = Utc::now();
        for item in &pending {
            let name = item.entry.name.as_str();
            match item.decision {
                Decision::NoOp => {
                    run.settle(item.index, UnitOutcome::NoOp)?;
                    state.record(
                        name,
                        item.entry.content_hash.clone(),
                        UnitFingerprint::of(&item.dest).ok(),
                        SyncOrigin::Pull,
                        now,
                    );
                }
                Decision::KeepLocal => run.settle(item.index, UnitOutcome::NoOp)?,
                Decision::Create | Decision::Update => {
                    let backup = options.backup && item.decision == Decision::Update;
                    match self.apply_unit(&store, item, backup.then_some(&backups), &mut run) {
                        Ok(()) => {
                            let outcome = if item.decision == Decision::Create {
                                UnitOutcome::Created
                            } else {
                                UnitOutcome::Updated
                            };
                            run.settle(item.index, outcome)?;
                            state.record(
                                name,
                                item.entry.content_hash.clone(),
                                UnitFingerprint::of(&item.dest).ok(),
                                SyncOrigin::Pull,
                                now,
                            );
                        }
                        Err(err) => {
                            warn!(unit = %name, error = %err, "failed to apply unit");
                            run.settle_failed(item.index, &err)?;
                        }
                    }
                }
            }
        }
        run.advance(RunPhase::Completed)?;

        state.last_pull = Some(now);
        state.last_source_reference = revision;
        state.save(&state_dir)?;

        let report = run.finish();
        self.journal(&report);
        info!("{}", report.summary_line());
        Ok(report)
    }

    /// Compare local units with the last sync, and optionally with the store.
    pub fn status(&self, check_remote: bool) -> Result<StatusReport> {
        let install_dir = self.install_dir();
        let state = SyncState::load(&self.state_dir())?;
        let local = discover_units(&install_dir)?;

        let (manifest, remote_revision) = if check_remote {
            let store = self.transport.sync_local_copy()?;
            let revision = self.transport.head_revision(&store);
            (Some(Manifest::load(&store.join(MANIFEST_FILE))?), revision)
        } else {
            (None, None)
        };
        let remote_entry = |name: &str| manifest.as_ref().and_then(|m| m.get(name));

        let hashes: Vec<(String, Result<String>)> = local
            .par_iter()
            .map(|unit| {
                let record = state.units.get(&unit.name);
                (unit.name.clone(), current_hash(&unit.path, record))
            })
            .collect();

        let mut units = Vec::new();
        for (name, hash) in hashes {
            let record = state.units.get(&name);
            let entry = remote_entry(&name);
            let remote_hash = entry.map(|e| e.content_hash.clone());
            let mut row = UnitStatusRow {
                name: name.clone(),
                status: UnitSyncStatus::Untracked,
                local_hash: None,
                tracked_hash: record.map(|r| r.hash.clone()),
                remote_hash,
                pushed_by: entry.map(|e| e.pushed_by.clone()),
                error: None,
            };
            match hash {
                Ok(hash) => {
                    row.status = classify(
                        Some(&hash),
                        record,
                        row.remote_hash.as_deref(),
                        check_remote,
                    );
                    row.local_hash = Some(hash);
                }
                Err(err) => {
                    warn!(unit = %name, error = %err, "cannot hash local unit");
                    row.error = Some(err.to_string());
                }
            }
            units.push(row);
        }

        for (name, record) in &state.units {
            if units.iter().any(|u| &u.name == name) {
                continue;
            }
            let entry = remote_entry(name);
            units.push(UnitStatusRow {
                name: name.clone(),
                status: classify(None, Some(record), None, check_remote),
                local_hash: None,
                tracked_hash: Some(record.hash.clone()),
                remote_hash: entry.map(|e| e.content_hash.clone()),
                pushed_by: entry.map(|e| e.pushed_by.clone()),
                error: None,
            });
        }

        if let Some(manifest) = &manifest {
            for entry in manifest.entries() {
                if units.iter().any(|u| u.name == entry.name) {
                    continue;
                }
                units.push(UnitStatusRow {
                    name: entry.name.clone(),
                    status: UnitSyncStatus::RemoteOnly,
                    local_hash: None,
                    tracked_hash: None,
                    remote_hash: Some(entry.content_hash.clone()),
                    pushed_by: Some(entry.pushed_by.clone()),
                    error: None,
                });
            }
        }
        units.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(StatusReport {
            workspace: self.workspace.clone(),
            install_dir,
            remote_checked: check_remote,
            last_push: state.last_push,
            last_pull: state.last_pull,
            last_source_reference: state.last_source_reference,
            remote_revision,
            units,
        })
    }

    /// Give a fresh store its skeleton: README, units dir and an empty manifest.
    pub fn seed_store(&self, dry_run: bool) -> Result<SeedReport> {
        let store = self.transport.sync_local_copy()?;
        let gitkeep = format!("{STORE_UNITS_DIR}/.gitkeep");
        let seeds: [(&str, &str); 3] = [
            ("README.md", STORE_README),
            (gitkeep.as_str(), ""),
            (MANIFEST_FILE, "{}\n"),
        ];
        let created: Vec<String> = seeds
            .iter()
            .filter(|(rel, _)| !store.join(rel).exists())
            .map(|(rel, _)| (*rel).to_string())
            .collect();
        if dry_run || created.is_empty() {
            return Ok(SeedReport {
                dry_run,
                created,
                revision: None,
            });
        }

        for (rel, body) in seeds.iter().filter(|(rel, _)| created.iter().any(|c| c == rel)) {
            let path = store.join(rel);
            if let Some(parent) = path.parent() {
                ensure_dir(parent)?;
            }
            std::fs::write(&path, body)?;
        }
        let revision = self.transport.commit(&store, "Initialize substrate store")?;
        self.transport.publish(&store)?;
        info!(revision = %revision, files = created.len(), "seeded shared store");
        Ok(SeedReport {
            dry_run,
            created,
            revision: Some(revision),
        })
    }

    /// Whether the existing entry was written by someone since our last sync.
    fn detect_conflict(&self, entry: &ManifestEntry, state: &SyncState) -> Option<ConflictWarning> {
        let last_known = state.tracked_hash(&entry.name);
        let conflicting = if entry.pushed_by == self.identity() {
            state.last_push.is_some_and(|last| entry.pushed_at > last)
        } else {
            last_known != Some(entry.content_hash.as_str())
        };
        conflicting.then(|| ConflictWarning {
            unit: entry.name.clone(),
            pushed_by: entry.pushed_by.clone(),
            pushed_at: entry.pushed_at,
            remote_hash: entry.content_hash.clone(),
            last_known_hash: last_known.map(str::to_string),
        })
    }

    /// Verify the store copy of a unit and swap it into the workspace.
    fn apply_unit(
        &self,
        store: &Path,
        item: &PendingPull,
        backups: Option<&BackupManager>,
        run: &mut SyncRun,
    ) -> Result<()> {
        let entry = &item.entry;
        let source = store.join(STORE_UNITS_DIR).join(&entry.name);
        if !source.is_dir() {
            return Err(SubstrateError::UnitApply {
                unit: entry.name.clone(),
                reason: format!("{STORE_UNITS_DIR}/{} is missing from the store", entry.name),
            });
        }
        let actual = hash_unit(&source)?;
        if actual != entry.content_hash {
            return Err(SubstrateError::Integrity {
                unit: entry.name.clone(),
                expected: entry.content_hash.clone(),
                actual,
            });
        }

        let options = PackOptions {
            exported_from: Some(entry.pushed_by.clone()),
            created_at: Some(entry.pushed_at),
            ..PackOptions::default()
        };
        let bundle = Bundle::pack(&source, &entry.name, &options)?;
        let staged = staging_dir_for(&item.dest)?;
        bundle.unpack(staged.path())?;
        let staged_hash = hash_unit(staged.path())?;
        if staged_hash != entry.content_hash {
            return Err(SubstrateError::Integrity {
                unit: entry.name.clone(),
                expected: entry.content_hash.clone(),
                actual: staged_hash,
            });
        }

        if let Some(backups) = backups
            && item.dest.exists()
        {
            let handle = backups.backup(&item.dest).map_err(|err| SubstrateError::UnitApply {
                unit: entry.name.clone(),
                reason: format!("backup failed: {err}"),
            })?;
            run.set_backup(item.index, handle.id);
        }
        swap_into_place(staged, &item.dest)?;
        info!(unit = %entry.name, hash = %entry.content_hash, "installed unit");
        Ok(())
    }

    fn record_push(
        &self,
        report: &SyncReport,
        pending: &[PendingPush],
        at: DateTime<Utc>,
        carried: bool,
    ) -> Result<()> {
        let state_dir = self.state_dir();
        let mut state = SyncState::load(&state_dir)?;
        if carried {
            state.settle_unpublished(&self.install_dir(), at)?;
        } else if state.unpublished.take().is_some() {
            // The copy was reset to the remote; that commit is gone.
            warn!("dropping record of a commit the store no longer holds");
        }
        for item in pending {
            let settled = report
                .units
                .iter()
                .find(|u| u.name == item.unit.name)
                .map(|u| u.outcome);
            if matches!(
                settled,
                Some(UnitOutcome::NoOp | UnitOutcome::Created | UnitOutcome::Updated)
            ) {
                state.record(
                    &item.unit.name,
                    item.bundle.content_hash().to_string(),
                    UnitFingerprint::of(&item.unit.path).ok(),
                    SyncOrigin::Push,
                    at,
                );
            }
        }
        state.last_push = Some(at);
        if let Some(revision) = report.revision.clone().or_else(|| report.base_revision.clone()) {
            state.last_source_reference = Some(revision);
        }
        state.save(&state_dir)
    }

    fn journal(&self, report: &SyncReport) {
        let journal = Journal::new(&self.state_dir());
        if let Err(err) = journal.append(&JournalEvent::from_report(report, self.identity())) {
            warn!(path = %journal.path().display(), error = %err, "failed to append journal event");
        }
    }
}

/// Replace `Skills/<name>` in the store's working tree with the bundle's files.
fn stage_into_store(units_root: &Path, name: &str, bundle: &Bundle) -> Result<()> {
    let dest = units_root.join(name);
    let staged = staging_dir_for(&dest)?;
    bundle.unpack(staged.path())?;
    swap_into_place(staged, &dest)
}

fn pull_decision(local_hash: Option<&str>, record: Option<&UnitRecord>, remote: &str) -> Decision {
    match local_hash {
        None => Decision::Create,
        Some(local) if local == remote => Decision::NoOp,
        Some(_) if record.is_some_and(|r| r.hash == remote) => Decision::KeepLocal,
        Some(_) => Decision::Update,
    }
}

const fn dry_outcome(decision: Decision) -> UnitOutcome {
    match decision {
        Decision::NoOp | Decision::KeepLocal => UnitOutcome::NoOp,
        Decision::Create => UnitOutcome::WouldCreate,
        Decision::Update => UnitOutcome::WouldUpdate,
    }
}

fn commit_message(identity: &str, names: &[String]) -> String {
    let shown = names
        .iter()
        .take(COMMIT_LIST_LIMIT)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > COMMIT_LIST_LIMIT {
        format!(
            "Sync from {identity}: {shown} (+{} more)",
            names.len() - COMMIT_LIST_LIMIT
        )
    } else {
        format!("Sync from {identity}: {shown}")
    }
}
