//! CLI module - Command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod commands;
pub mod output;

/// Substrate - keep two workspaces' skills in sync through a shared git store
#[derive(Parser, Debug)]
#[command(name = "substrate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Emit machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub robot: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: global file patched by <workspace>/substrate.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Workspace root (default: $SUBSTRATE_WORKSPACE or the current directory)
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish local skills to the shared store
    Push(commands::push::PushArgs),

    /// Install or update skills from the shared store
    Pull(commands::pull::PullArgs),

    /// Show how local skills compare with the last sync
    Status(commands::status::StatusArgs),

    /// Create, validate and list single-skill bundles
    Bundle(commands::bundle::BundleArgs),

    /// List and restore pre-pull backups
    Backup(commands::backup::BackupArgs),

    /// Check the environment or initialise the shared store
    Setup(commands::setup::SetupArgs),

    /// Generate shell completions
    Completions(commands::completions::CompletionsArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["substrate", "status", "--robot", "-vv", "--workspace", "/tmp"])
            .unwrap();
        assert!(cli.robot);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp")));
        assert!(matches!(cli.command, Commands::Status(_)));
    }
}
