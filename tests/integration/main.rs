//! End-to-end push/pull runs between two workspaces over a local bare git store.

mod fixture;

mod backup_workflow;
mod sync_workflow;
