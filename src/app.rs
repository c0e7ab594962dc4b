//! Per-invocation context shared by every command.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::{Result, SubstrateError};
use crate::sync::{Synchronizer, WorkspaceLock};
use crate::transport::GitTransport;

pub struct AppContext {
    pub config: Config,
    /// Explicit config file, if one was given.
    pub config_path: Option<PathBuf>,
    pub workspace: PathBuf,
    pub robot_mode: bool,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let workspace = resolve_workspace(cli.workspace.as_deref())?;
        let config = Config::load(cli.config.as_deref(), &workspace)?;
        debug!(workspace = %workspace.display(), "context ready");
        Ok(Self {
            config,
            config_path: cli.config.clone(),
            workspace,
            robot_mode: cli.robot,
        })
    }

    #[must_use]
    pub fn install_dir(&self) -> PathBuf {
        self.config.install_dir(&self.workspace)
    }

    #[must_use]
    pub fn transport(&self) -> GitTransport {
        GitTransport::new(
            self.config.remote_url(),
            self.config.substrate.branch.clone(),
            self.config.store_dir(&self.workspace),
            &self.config.identity.name,
            self.config.timeout(),
        )
    }

    /// A synchronizer over the configured git store. Fails on incomplete config.
    pub fn synchronizer(&self) -> Result<Synchronizer<'_, GitTransport>> {
        self.config.validate()?;
        Ok(Synchronizer::new(
            &self.config,
            &self.workspace,
            self.transport(),
        ))
    }

    /// Take the workspace lock for the rest of the command.
    pub fn lock(&self, wait: bool) -> Result<WorkspaceLock> {
        WorkspaceLock::acquire(&self.config.lock_path(&self.workspace), wait)
    }
}

/// Workspace root: flag, then `SUBSTRATE_WORKSPACE`, then the current directory.
fn resolve_workspace(flag: Option<&Path>) -> Result<PathBuf> {
    let raw = match flag {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os("SUBSTRATE_WORKSPACE").filter(|v| !v.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir()?,
        },
    };
    std::fs::canonicalize(&raw).map_err(|err| {
        SubstrateError::Config(format!("workspace {}: {err}", raw.display()))
    })
}
