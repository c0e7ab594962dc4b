//! Per-invocation run record: phase tracking, unit outcomes and the report.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SubstrateError};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RunKind {
    Push,
    Pull,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Pull => "pull",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    Initialized,
    StoreSynced,
    ManifestLoaded,
    Diffing,
    Applying,
    Committing,
    Completed,
    Failed,
}

impl RunPhase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn allows(self, next: Self) -> bool {
        use RunPhase::{
            Applying, Committing, Completed, Diffing, Failed, Initialized, ManifestLoaded,
            StoreSynced,
        };
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed)
                | (Initialized, StoreSynced | Committing)
                | (StoreSynced, ManifestLoaded)
                | (ManifestLoaded, Diffing)
                | (Diffing, Applying | Committing | Completed)
                | (Applying, Committing | Completed)
                | (Committing, Completed)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// What the diff decided for a unit.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    NoOp,
    Create,
    Update,
    /// Local edits preserved because the store has not moved since the last sync.
    KeepLocal,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UnitOutcome {
    Pending,
    NoOp,
    WouldCreate,
    WouldUpdate,
    Created,
    Updated,
    Failed,
}

impl UnitOutcome {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::NoOp => "no-op",
            Self::WouldCreate => "would-create",
            Self::WouldUpdate => "would-update",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Failed => "failed",
        }
    }
}

/// The store entry for a unit was overwritten by someone since we last saw it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConflictWarning {
    pub unit: String,
    pub pushed_by: String,
    pub pushed_at: DateTime<Utc>,
    pub remote_hash: String,
    pub last_known_hash: Option<String>,
}

impl fmt::Display for ConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} was pushed by {} at {} since your last sync; your push overwrites it",
            self.unit,
            self.pushed_by,
            self.pushed_at.to_rfc3339()
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub decision: Decision,
    pub outcome: UnitOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Success,
    PartialFailure,
    PublishFailed,
    Failed,
}

/// Mutable record of one push or pull.
#[derive(Debug)]
pub struct SyncRun {
    run_id: Uuid,
    kind: RunKind,
    dry_run: bool,
    phase: RunPhase,
    started: Instant,
    started_at: DateTime<Utc>,
    units: Vec<UnitReport>,
    conflicts: Vec<ConflictWarning>,
    warnings: Vec<String>,
    base_revision: Option<String>,
    revision: Option<String>,
    published: Option<bool>,
    error: Option<String>,
}

impl SyncRun {
    #[must_use]
    pub fn new(kind: RunKind, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            dry_run,
            phase: RunPhase::Initialized,
            started: Instant::now(),
            started_at: Utc::now(),
            units: Vec::new(),
            conflicts: Vec::new(),
            warnings: Vec::new(),
            base_revision: None,
            revision: None,
            published: None,
            error: None,
        }
    }

    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[must_use]
    pub const fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.allows(next) {
            return Err(SubstrateError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!(run = %self.run_id, from = %self.phase, to = %next, "run phase");
        self.phase = next;
        Ok(())
    }

    /// Mark the run failed, remembering why.
    pub fn fail(&mut self, err: &SubstrateError) {
        if !self.phase.is_terminal() {
            self.phase = RunPhase::Failed;
        }
        self.error = Some(err.to_string());
    }

    /// Register a unit with its diff decision. Returns its index.
    pub fn add_unit(
        &mut self,
        name: &str,
        decision: Decision,
        local_hash: Option<String>,
        remote_hash: Option<String>,
    ) -> usize {
        self.units.push(UnitReport {
            name: name.to_string(),
            decision,
            outcome: UnitOutcome::Pending,
            local_hash,
            remote_hash,
            backup_id: None,
            error: None,
        });
        self.units.len() - 1
    }

    /// Settle a unit's outcome. Each unit settles exactly once.
    pub fn settle(&mut self, index: usize, outcome: UnitOutcome) -> Result<()> {
        let unit = self.units.get_mut(index).ok_or_else(|| SubstrateError::InvalidTransition {
            from: format!("unit #{index}"),
            to: outcome.label().to_string(),
        })?;
        if unit.outcome.is_terminal() || !outcome.is_terminal() {
            return Err(SubstrateError::InvalidTransition {
                from: format!("{}:{}", unit.name, unit.outcome.label()),
                to: outcome.label().to_string(),
            });
        }
        unit.outcome = outcome;
        Ok(())
    }

    pub fn settle_failed(&mut self, index: usize, err: &SubstrateError) -> Result<()> {
        self.settle(index, UnitOutcome::Failed)?;
        self.units[index].error = Some(err.to_string());
        Ok(())
    }

    pub fn set_backup(&mut self, index: usize, backup_id: String) {
        if let Some(unit) = self.units.get_mut(index) {
            unit.backup_id = Some(backup_id);
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn add_conflict(&mut self, conflict: ConflictWarning) {
        self.conflicts.push(conflict);
    }

    pub fn set_base_revision(&mut self, revision: Option<String>) {
        self.base_revision = revision;
    }

    pub fn set_revision(&mut self, revision: String) {
        self.revision = Some(revision);
    }

    pub const fn set_published(&mut self, published: bool) {
        self.published = Some(published);
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.units
            .iter()
            .filter(|unit| unit.outcome == UnitOutcome::Failed)
            .count()
    }

    /// Names of units whose outcome changed the target.
    #[must_use]
    pub fn applied_names(&self) -> Vec<String> {
        self.units
            .iter()
            .filter(|unit| matches!(unit.outcome, UnitOutcome::Created | UnitOutcome::Updated))
            .map(|unit| unit.name.clone())
            .collect()
    }

    #[must_use]
    pub fn verdict(&self) -> Verdict {
        let failed = self.failed_count();
        if self.phase == RunPhase::Failed && failed == 0 {
            return if self.published == Some(false) {
                Verdict::PublishFailed
            } else {
                Verdict::Failed
            };
        }
        if failed == 0 {
            Verdict::Success
        } else if failed == self.units.len() {
            Verdict::Failed
        } else {
            Verdict::PartialFailure
        }
    }

    #[must_use]
    pub fn finish(self) -> SyncReport {
        let verdict = self.verdict();
        let failed = self.failed_count();
        SyncReport {
            run_id: self.run_id.to_string(),
            kind: self.kind,
            dry_run: self.dry_run,
            phase: self.phase,
            verdict,
            started_at: self.started_at,
            duration_ms: self.started.elapsed().as_millis(),
            base_revision: self.base_revision,
            revision: self.revision,
            published: self.published,
            failed,
            units: self.units,
            conflicts: self.conflicts,
            warnings: self.warnings,
            error: self.error,
        }
    }
}

/// Finished run, ready for output and the journal.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub kind: RunKind,
    pub dry_run: bool,
    pub phase: RunPhase,
    pub verdict: Verdict,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    pub failed: usize,
    pub units: Vec<UnitReport>,
    pub conflicts: Vec<ConflictWarning>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Success
    }

    #[must_use]
    pub fn count(&self, outcome: UnitOutcome) -> usize {
        self.units.iter().filter(|u| u.outcome == outcome).count()
    }

    #[must_use]
    pub fn summary_line(&self) -> String {
        let prefix = if self.dry_run { "dry run: " } else { "" };
        format!(
            "{prefix}{}: {} created, {} updated, {} no-op, {} failed",
            self.kind,
            self.count(UnitOutcome::Created) + self.count(UnitOutcome::WouldCreate),
            self.count(UnitOutcome::Updated) + self.count(UnitOutcome::WouldUpdate),
            self.count(UnitOutcome::NoOp),
            self.failed
        )
    }
}
