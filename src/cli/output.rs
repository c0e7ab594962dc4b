use chrono::{DateTime, Utc};
use console::{StyledObject, style};
use serde::Serialize;

use crate::error::{ErrorCode, Result, SubstrateError, StructuredError};
use crate::sync::{UnitOutcome, UnitSyncStatus, Verdict};

#[derive(Serialize)]
pub struct RobotResponse<T> {
    pub status: RobotStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub data: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    Ok,
    /// Rich error with structured information
    #[serde(rename = "error")]
    StructuredError {
        /// Error code enum value (e.g., "UNIT_NOT_FOUND")
        code: ErrorCode,
        numeric_code: u16,
        message: String,
        /// Actionable suggestion for recovery
        suggestion: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
        recoverable: bool,
        category: String,
    },
    /// Some units were applied, some failed.
    Partial { completed: usize, failed: usize },
}

impl<T> RobotResponse<T> {
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

pub fn robot_ok<T: Serialize>(data: T) -> RobotResponse<T> {
    robot_with_status(RobotStatus::Ok, data)
}

pub fn robot_partial<T: Serialize>(completed: usize, failed: usize, data: T) -> RobotResponse<T> {
    robot_with_status(RobotStatus::Partial { completed, failed }, data)
}

/// Create a robot error response from a [`SubstrateError`] with structured information.
pub fn robot_error_structured(err: &SubstrateError) -> RobotResponse<serde_json::Value> {
    robot_with_status(RobotStatus::from(err.to_structured()), serde_json::Value::Null)
}

/// An error status that still carries the run's data.
pub fn robot_failure<T: Serialize>(err: &SubstrateError, data: T) -> RobotResponse<T> {
    robot_with_status(RobotStatus::from(err.to_structured()), data)
}

fn robot_with_status<T>(status: RobotStatus, data: T) -> RobotResponse<T> {
    RobotResponse {
        status,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data,
        warnings: Vec::new(),
    }
}

impl From<StructuredError> for RobotStatus {
    fn from(err: StructuredError) -> Self {
        Self::StructuredError {
            code: err.code,
            numeric_code: err.numeric_code,
            message: err.message,
            suggestion: err.suggestion,
            context: err.context,
            recoverable: err.recoverable,
            category: err.category,
        }
    }
}

pub fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    println!("{payload}");
    Ok(())
}

pub struct HumanLayout {
    lines: Vec<String>,
    key_width: usize,
}

impl Default for HumanLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanLayout {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Vec::new(),
            key_width: 18,
        }
    }

    pub fn title(&mut self, text: &str) -> &mut Self {
        self.lines.push(style(text).bold().to_string());
        self.lines.push(String::new());
        self
    }

    pub fn section(&mut self, text: &str) -> &mut Self {
        self.lines.push(style(text).bold().to_string());
        self.lines.push("-".repeat(text.len().max(3)));
        self
    }

    pub fn kv(&mut self, key: &str, value: &str) -> &mut Self {
        // Pad before styling; escape codes would eat the width.
        let padded = format!("{key:width$}", width = self.key_width);
        self.lines.push(format!("{} {value}", style(padded).dim()));
        self
    }

    pub fn bullet(&mut self, text: &str) -> &mut Self {
        self.lines.push(format!("- {text}"));
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.lines.push(String::new());
        self
    }

    pub fn push_line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    #[must_use]
    pub fn build(self) -> String {
        self.lines.join("\n")
    }
}

pub fn emit_human(layout: HumanLayout) {
    println!("{}", layout.build());
}

pub fn styled_outcome(outcome: UnitOutcome) -> StyledObject<&'static str> {
    let label = style(outcome.label());
    match outcome {
        UnitOutcome::Created | UnitOutcome::Updated => label.green(),
        UnitOutcome::WouldCreate | UnitOutcome::WouldUpdate => label.cyan(),
        UnitOutcome::Failed => label.red().bold(),
        UnitOutcome::NoOp | UnitOutcome::Pending => label.dim(),
    }
}

pub fn styled_status(status: UnitSyncStatus) -> StyledObject<&'static str> {
    let label = style(status.label());
    match status {
        UnitSyncStatus::InSync => label.green(),
        UnitSyncStatus::LocalDrift | UnitSyncStatus::Untracked => label.yellow(),
        UnitSyncStatus::RemoteAhead | UnitSyncStatus::RemoteOnly => label.cyan(),
        UnitSyncStatus::Diverged | UnitSyncStatus::Missing => label.red(),
    }
}

pub fn styled_verdict(verdict: Verdict) -> StyledObject<&'static str> {
    match verdict {
        Verdict::Success => style("success").green().bold(),
        Verdict::PartialFailure => style("partial failure").yellow().bold(),
        Verdict::PublishFailed => style("publish failed").red().bold(),
        Verdict::Failed => style("failed").red().bold(),
    }
}

/// Short display form of a content hash.
#[must_use]
pub fn short_hash(hash: &str) -> &str {
    let digest = hash.strip_prefix("sha256:").unwrap_or(hash);
    digest.get(..12).unwrap_or(digest)
}
