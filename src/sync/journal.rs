//! Append-only JSONL log of push and pull runs.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

use super::run::SyncReport;

pub const JOURNAL_FILE: &str = "substrate.log";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEvent {
    pub ts: DateTime<Utc>,
    pub run_id: String,
    pub event: String,
    pub identity: String,
    pub verdict: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default)]
    pub units: Vec<JournalUnit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalUnit {
    pub name: String,
    pub outcome: String,
}

impl JournalEvent {
    #[must_use]
    pub fn from_report(report: &SyncReport, identity: &str) -> Self {
        Self {
            ts: Utc::now(),
            run_id: report.run_id.clone(),
            event: report.kind.to_string(),
            identity: identity.to_string(),
            verdict: serde_json::to_value(report.verdict)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            revision: report.revision.clone().or_else(|| report.base_revision.clone()),
            units: report
                .units
                .iter()
                .map(|unit| JournalUnit {
                    name: unit.name.clone(),
                    outcome: unit.outcome.label().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(JOURNAL_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &JournalEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Most recent events, newest last. Unparseable lines are skipped.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEvent>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut events = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(line = idx + 1, "skipping journal line: {err}"),
            }
        }
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::run::{Decision, RunKind, SyncRun, UnitOutcome};
    use tempfile::TempDir;

    #[test]
    fn append_and_read_back() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path());
        assert!(journal.recent(5).unwrap().is_empty());

        let mut run = SyncRun::new(RunKind::Push, false);
        let idx = run.add_unit("foo", Decision::Create, None, None);
        run.settle(idx, UnitOutcome::Created).unwrap();
        run.set_revision("abc".into());
        let report = run.finish();

        journal.append(&JournalEvent::from_report(&report, "alice")).unwrap();
        journal.append(&JournalEvent::from_report(&report, "alice")).unwrap();

        let events = journal.recent(1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "push");
        assert_eq!(events[0].verdict, "success");
        assert_eq!(events[0].revision.as_deref(), Some("abc"));
        assert_eq!(events[0].units[0].outcome, "created");
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path());
        std::fs::write(journal.path(), "not json\n\n").unwrap();
        assert!(journal.recent(10).unwrap().is_empty());
    }
}
