//! Two-workspace replication through a shared store.

pub mod engine;
pub mod journal;
pub mod lock;
pub mod manifest;
pub mod run;
pub mod state;

pub use engine::{
    PullOptions, PushOptions, STORE_UNITS_DIR, SeedReport, StatusReport, Synchronizer,
    UnitStatusRow,
};
pub use journal::{Journal, JournalEvent};
pub use lock::WorkspaceLock;
pub use manifest::{MANIFEST_FILE, Manifest, ManifestEntry};
pub use run::{ConflictWarning, Decision, RunKind, RunPhase, SyncReport, SyncRun, UnitOutcome, Verdict};
pub use state::{SyncState, UnitSyncStatus};
