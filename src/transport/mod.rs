//! Access to the shared store.
//!
//! The synchronizer only sees the [`Transport`] trait: a local working copy
//! of the store that can be refreshed, committed to and published.
//! [`GitTransport`] implements it over a git remote with `git2`.

mod git;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use git::{GitTransport, set_network_timeouts};

/// Operations on the shared store.
pub trait Transport {
    /// Clone or fast-forward the local working copy and return its root.
    /// Uncommitted changes in the copy are discarded.
    fn sync_local_copy(&self) -> Result<PathBuf>;

    /// Record everything under `path` as one revision; returns its id.
    fn commit(&self, path: &Path, message: &str) -> Result<String>;

    /// Make the current revision visible to the other workspace.
    fn publish(&self, path: &Path) -> Result<()>;

    /// Create the remote store if it does not exist.
    fn create_remote(&self) -> Result<()>;

    /// Revision currently checked out in the working copy.
    fn head_revision(&self, path: &Path) -> Option<String>;

    /// Whether the working copy holds commits the remote has not seen.
    fn has_unpublished(&self, path: &Path) -> Result<bool>;

    /// Where the working copy lives, whether or not it has been synchronised.
    fn local_copy(&self) -> PathBuf;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloneMethod {
    #[default]
    Https,
    Ssh,
}

/// Turn a configured repository into a URL git understands.
///
/// Paths and full URLs are used as given; `owner/name` is a GitHub shorthand.
#[must_use]
pub fn resolve_remote_url(repo: &str, method: CloneMethod) -> String {
    if is_local_remote(repo) || repo.contains("://") || repo.starts_with("git@") {
        return repo.to_string();
    }
    let trimmed = repo.trim_end_matches(".git");
    let is_shorthand = trimmed.split('/').count() == 2
        && trimmed
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if !is_shorthand {
        return repo.to_string();
    }
    match method {
        CloneMethod::Https => format!("https://github.com/{trimmed}.git"),
        CloneMethod::Ssh => format!("git@github.com:{trimmed}.git"),
    }
}

/// Whether the remote is a path on this machine.
#[must_use]
pub fn is_local_remote(repo: &str) -> bool {
    repo.starts_with("file://")
        || repo.starts_with('/')
        || repo.starts_with("./")
        || repo.starts_with("../")
        || repo.starts_with('~')
        || Path::new(repo).is_absolute()
}

/// Filesystem path of a local remote.
#[must_use]
pub fn local_remote_path(repo: &str) -> Option<PathBuf> {
    if !is_local_remote(repo) {
        return None;
    }
    if let Some(rest) = repo.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if let Some(rest) = repo.strip_prefix("~/") {
        return dirs::home_dir().map(|home| home.join(rest));
    }
    Some(PathBuf::from(repo))
}
