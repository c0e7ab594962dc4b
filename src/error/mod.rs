//! Error handling for substrate.
//!
//! This module provides:
//! - [`SubstrateError`]: The main error enum for all substrate operations
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Rich error type with suggestions and context

mod codes;

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;

/// Main error type for substrate operations.
#[derive(Error, Debug)]
pub enum SubstrateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport timed out: {0}")]
    Timeout(String),

    #[error("Committed {revision} but publish failed: {reason}")]
    PublishFailed { revision: String, reason: String },

    #[error("Integrity check failed for '{unit}': expected {expected}, found {actual}")]
    Integrity {
        unit: String,
        expected: String,
        actual: String,
    },

    #[error("Manifest {path} is corrupt: {reason}")]
    ManifestCorrupt { path: String, reason: String },

    #[error("Failed to apply unit '{unit}': {reason}")]
    UnitApply { unit: String, reason: String },

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("None of the requested units matched: {}", .requested.join(", "))]
    NoMatchingUnits {
        requested: Vec<String>,
        available: Vec<String>,
    },

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Workspace is locked by another process: {0}")]
    LockHeld(String),

    #[error("Lock failed: {0}")]
    LockFailed(String),

    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("sync run did not complete cleanly ({failed} unit(s) failed)")]
    RunFailed { failed: usize },
}

impl SubstrateError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) | Self::Yaml(_) => ErrorCode::SerializationError,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::MissingConfig(_) => ErrorCode::ConfigMissingRequired,
            Self::Transport(_) => ErrorCode::TransportFailed,
            Self::Timeout(_) => ErrorCode::TransportTimeout,
            Self::PublishFailed { .. } => ErrorCode::PublishFailed,
            Self::Integrity { .. } => ErrorCode::IntegrityMismatch,
            Self::ManifestCorrupt { .. } => ErrorCode::ManifestCorrupt,
            Self::UnitApply { .. } => ErrorCode::UnitApplyFailed,
            Self::UnitNotFound(_) => ErrorCode::UnitNotFound,
            Self::InvalidUnit(_) => ErrorCode::UnitInvalid,
            Self::NoMatchingUnits { .. } => ErrorCode::NoMatchingUnits,
            Self::InvalidBundle(_) => ErrorCode::BundleInvalid,
            Self::BackupNotFound(_) => ErrorCode::BackupNotFound,
            Self::LockHeld(_) => ErrorCode::LockHeld,
            Self::LockFailed(_) => ErrorCode::LockFailed,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::RunFailed { .. } => ErrorCode::RunFailed,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::Integrity {
                unit,
                expected,
                actual,
            } => Some(serde_json::json!({
                "unit": unit,
                "expected": expected,
                "actual": actual,
            })),
            Self::UnitApply { unit, reason } => {
                Some(serde_json::json!({ "unit": unit, "reason": reason }))
            }
            Self::PublishFailed { revision, .. } => {
                Some(serde_json::json!({ "revision": revision }))
            }
            Self::ManifestCorrupt { path, .. } => Some(serde_json::json!({ "path": path })),
            Self::NoMatchingUnits {
                requested,
                available,
            } => Some(serde_json::json!({ "requested": requested, "available": available })),
            Self::MissingConfig(key) => Some(serde_json::json!({ "config_key": key })),
            Self::RunFailed { failed } => Some(serde_json::json!({ "failed": failed })),
            _ => None,
        }
    }

    /// Whether this error only concerns a single unit and leaves the run usable.
    #[must_use]
    pub const fn is_unit_scoped(&self) -> bool {
        matches!(
            self,
            Self::Integrity { .. } | Self::UnitApply { .. } | Self::InvalidBundle(_)
        )
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_error(self)
    }
}

impl From<git2::Error> for SubstrateError {
    fn from(err: git2::Error) -> Self {
        Self::Transport(err.message().to_string())
    }
}

/// A structured error with machine-readable code, suggestion, and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub recoverable: bool,
    pub category: String,
}

impl StructuredError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            numeric_code: code.numeric(),
            suggestion: code.suggestion().to_string(),
            context: None,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn from_error(err: &SubstrateError) -> Self {
        let code = err.code();
        Self {
            code,
            numeric_code: code.numeric(),
            message: err.to_string(),
            suggestion: suggestion_for(err),
            context: err.context(),
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
        }
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<&SubstrateError> for StructuredError {
    fn from(err: &SubstrateError) -> Self {
        Self::from_error(err)
    }
}

fn suggestion_for(err: &SubstrateError) -> String {
    match err {
        SubstrateError::NoMatchingUnits { available, .. } if !available.is_empty() => format!(
            "Available units: {}",
            available.join(", ")
        ),
        SubstrateError::MissingConfig(key) => format!(
            "Required config '{key}' is missing. Add it to substrate.yaml or set the matching SUBSTRATE_* variable"
        ),
        SubstrateError::PublishFailed { revision, .. } => format!(
            "Commit {revision} is kept in the store cache. Retry with `substrate push --retry-publish`"
        ),
        _ => err.code().suggestion().to_string(),
    }
}

/// Result type alias using SubstrateError.
pub type Result<T> = std::result::Result<T, SubstrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_mapping() {
        assert_eq!(
            SubstrateError::UnitNotFound("x".into()).code(),
            ErrorCode::UnitNotFound
        );
        assert_eq!(
            SubstrateError::Config("bad".into()).code(),
            ErrorCode::ConfigInvalid
        );
        assert_eq!(
            SubstrateError::ManifestCorrupt {
                path: "MANIFEST.json".into(),
                reason: "eof".into()
            }
            .code(),
            ErrorCode::ManifestCorrupt
        );
    }

    #[test]
    fn integrity_error_carries_context() {
        let err = SubstrateError::Integrity {
            unit: "foo".into(),
            expected: "sha256:aa".into(),
            actual: "sha256:bb".into(),
        };
        let ctx = err.context().unwrap();
        assert_eq!(ctx["unit"], "foo");
        assert!(err.is_unit_scoped());
        assert!(err.to_string().contains("sha256:bb"));
    }

    #[test]
    fn transport_errors_are_not_unit_scoped() {
        assert!(!SubstrateError::Transport("offline".into()).is_unit_scoped());
        assert!(!SubstrateError::ManifestCorrupt {
            path: "m".into(),
            reason: "r".into()
        }
        .is_unit_scoped());
    }

    #[test]
    fn structured_error_lists_available_units() {
        let err = SubstrateError::NoMatchingUnits {
            requested: vec!["nope".into()],
            available: vec!["alpha".into(), "beta".into()],
        };
        let structured = err.to_structured();
        assert_eq!(structured.numeric_code, 103);
        assert_eq!(structured.category, "unit");
        assert!(structured.suggestion.contains("alpha, beta"));
    }

    #[test]
    fn structured_error_serializes() {
        let err = StructuredError::new(ErrorCode::PublishFailed, "push rejected");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("PUBLISH_FAILED"));
        assert!(json.contains("\"numeric_code\":502"));
        assert_eq!(format!("{err}"), "[E502] push rejected");
    }
}
