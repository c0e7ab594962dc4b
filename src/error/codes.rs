//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Unit errors
//! - 2xx: Integrity errors (manifest, bundle)
//! - 3xx: Config errors
//! - 5xx: Transport errors
//! - 6xx: Storage errors
//! - 7xx: Backup errors
//! - 8xx: Run errors (locking, partial failure)
//! - 9xx: Internal errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for robot mode output.
///
/// Each variant maps to a numeric code (e.g., `UnitNotFound` -> E101).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Unit errors (1xx)
    // ========================================
    /// E101: Requested unit does not exist locally or in the manifest
    UnitNotFound,
    /// E102: Directory is not a valid unit (missing descriptor, bad name)
    UnitInvalid,
    /// E103: None of the requested units matched
    NoMatchingUnits,
    /// E104: Copying, staging or unpacking a unit failed
    UnitApplyFailed,

    // ========================================
    // Integrity errors (2xx)
    // ========================================
    /// E201: Shared store manifest cannot be parsed
    ManifestCorrupt,
    /// E202: Recomputed content hash differs from the recorded hash
    IntegrityMismatch,
    /// E203: Bundle archive is malformed or unsafe
    BundleInvalid,

    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E301: Config file not found
    ConfigNotFound,
    /// E302: Config file has invalid syntax or values
    ConfigInvalid,
    /// E304: Required config value is missing
    ConfigMissingRequired,

    // ========================================
    // Transport errors (5xx)
    // ========================================
    /// E501: Cannot reach or synchronize with the shared store
    TransportFailed,
    /// E502: Commit succeeded but publishing it failed
    PublishFailed,
    /// E503: Transport operation exceeded its timeout
    TransportTimeout,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E601: Failed to read or write local files
    StorageError,
    /// E605: Serialization/deserialization failed
    SerializationError,

    // ========================================
    // Backup errors (7xx)
    // ========================================
    /// E701: Backup id does not resolve to a snapshot
    BackupNotFound,

    // ========================================
    // Run errors (8xx)
    // ========================================
    /// E801: One or more units failed during the run
    RunFailed,
    /// E851: Another process holds the workspace lock
    LockHeld,
    /// E852: Failed to acquire lock
    LockFailed,

    // ========================================
    // Internal errors (9xx)
    // ========================================
    /// E901: Unexpected internal error
    InternalError,
    /// E904: Run state machine was driven through an illegal transition
    InvalidTransition,
    /// E906: IO operation failed
    IoError,
}

impl ErrorCode {
    /// Get the numeric error code (e.g., `UnitNotFound` -> 101).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::UnitNotFound => 101,
            Self::UnitInvalid => 102,
            Self::NoMatchingUnits => 103,
            Self::UnitApplyFailed => 104,

            Self::ManifestCorrupt => 201,
            Self::IntegrityMismatch => 202,
            Self::BundleInvalid => 203,

            Self::ConfigNotFound => 301,
            Self::ConfigInvalid => 302,
            Self::ConfigMissingRequired => 304,

            Self::TransportFailed => 501,
            Self::PublishFailed => 502,
            Self::TransportTimeout => 503,

            Self::StorageError => 601,
            Self::SerializationError => 605,

            Self::BackupNotFound => 701,

            Self::RunFailed => 801,
            Self::LockHeld => 851,
            Self::LockFailed => 852,

            Self::InternalError => 901,
            Self::InvalidTransition => 904,
            Self::IoError => 906,
        }
    }

    /// Get the error code as a formatted string (e.g., "E101").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Get the default suggestion for this error code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::UnitNotFound => "Run `substrate bundle list` to see the units present in this workspace",
            Self::UnitInvalid => "A unit is a directory containing a SKILL.md descriptor. Check the directory layout",
            Self::NoMatchingUnits => "Check the names passed to --skills against `substrate bundle list` or `substrate status --remote`",
            Self::UnitApplyFailed => "Check permissions on the install directory. Any backup taken is listed by `substrate backup list`",

            Self::ManifestCorrupt => "Inspect MANIFEST.json in the shared repository and repair it by hand, then retry",
            Self::IntegrityMismatch => "The unit content does not match its recorded hash. Ask the partner to push it again",
            Self::BundleInvalid => "Recreate the bundle with `substrate bundle create`",

            Self::ConfigNotFound => "Run `substrate setup init` to create a configuration, or pass --config <path>",
            Self::ConfigInvalid => "Check YAML syntax and field types in substrate.yaml",
            Self::ConfigMissingRequired => "Set identity.name, partner.name and substrate.repo in substrate.yaml",

            Self::TransportFailed => "Check the remote URL and your git credentials, then retry. Nothing was changed locally",
            Self::PublishFailed => "The commit exists locally. Retry with `substrate push --retry-publish`",
            Self::TransportTimeout => "The remote did not answer in time. Check connectivity or raise substrate.timeout_secs",

            Self::StorageError => "Check disk space and write permissions on the workspace and state directory",
            Self::SerializationError => "The data format may be corrupted. Check the file for validity",

            Self::BackupNotFound => "Run `substrate backup list` to see available backup ids",

            Self::RunFailed => "Review the per-unit table above. Successful units were applied",
            Self::LockHeld => "Another substrate process is running for this workspace. Wait for it or pass --wait",
            Self::LockFailed => "Failed to acquire lock. Check permissions on the cache directory",

            Self::InternalError => "An unexpected error occurred. Please report this issue with full error output",
            Self::InvalidTransition => "Internal state machine error. This is a bug. Please report with full context",
            Self::IoError => "File operation failed. Check path exists and permissions are correct",
        }
    }

    /// Check if this error is potentially recoverable by the user.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::SerializationError | Self::InternalError | Self::InvalidTransition
        )
    }

    /// Get the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "unit",
            2 => "integrity",
            3 => "config",
            5 => "transport",
            6 => "storage",
            7 => "backup",
            8 => "run",
            9 => "internal",
            _ => "unknown",
        }
    }

    /// Iterate over all error codes.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::UnitNotFound,
            Self::UnitInvalid,
            Self::NoMatchingUnits,
            Self::UnitApplyFailed,
            Self::ManifestCorrupt,
            Self::IntegrityMismatch,
            Self::BundleInvalid,
            Self::ConfigNotFound,
            Self::ConfigInvalid,
            Self::ConfigMissingRequired,
            Self::TransportFailed,
            Self::PublishFailed,
            Self::TransportTimeout,
            Self::StorageError,
            Self::SerializationError,
            Self::BackupNotFound,
            Self::RunFailed,
            Self::LockHeld,
            Self::LockFailed,
            Self::InternalError,
            Self::InvalidTransition,
            Self::IoError,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_codes_follow_taxonomy() {
        assert_eq!(ErrorCode::UnitNotFound.numeric(), 101);
        assert_eq!(ErrorCode::ManifestCorrupt.numeric(), 201);
        assert_eq!(ErrorCode::ConfigNotFound.numeric(), 301);
        assert_eq!(ErrorCode::TransportFailed.numeric(), 501);
        assert_eq!(ErrorCode::StorageError.numeric(), 601);
        assert_eq!(ErrorCode::BackupNotFound.numeric(), 701);
        assert_eq!(ErrorCode::RunFailed.numeric(), 801);
        assert_eq!(ErrorCode::InternalError.numeric(), 901);
    }

    #[test]
    fn all_codes_have_suggestions_and_categories() {
        for code in ErrorCode::all() {
            assert!(!code.suggestion().is_empty(), "{code:?} has empty suggestion");
            assert_ne!(code.category(), "unknown", "{code:?} has invalid category");
        }
    }

    #[test]
    fn codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            assert!(seen.insert(code.numeric()), "duplicate numeric code for {code:?}");
        }
    }

    #[test]
    fn serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::IntegrityMismatch).unwrap();
        assert_eq!(json, "\"INTEGRITY_MISMATCH\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::IntegrityMismatch);
    }

    #[test]
    fn display_uses_code_string() {
        assert_eq!(format!("{}", ErrorCode::PublishFailed), "E502");
        assert_eq!(ErrorCode::LockHeld.category(), "run");
        assert!(!ErrorCode::InvalidTransition.is_recoverable());
        assert!(ErrorCode::TransportFailed.is_recoverable());
    }
}
