//! substrate pull - install or update skills from the shared store.

use clap::Args;

use crate::app::AppContext;
use crate::error::Result;
use crate::sync::PullOptions;

use super::report;
use super::split_names;

#[derive(Args, Debug, Default)]
pub struct PullArgs {
    /// Skills to pull (comma-separated or repeated; default: everything in the store)
    #[arg(long, value_name = "NAMES")]
    pub skills: Vec<String>,

    /// Report what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Overwrite local skills without taking a backup first
    #[arg(long)]
    pub no_backup: bool,

    /// Wait for another substrate process to release the workspace
    #[arg(long)]
    pub wait: bool,
}

pub fn run(ctx: &AppContext, args: &PullArgs) -> Result<()> {
    let sync = ctx.synchronizer()?;
    let _lock = ctx.lock(args.wait)?;

    let report = sync.pull(&PullOptions {
        units: split_names(&args.skills),
        dry_run: args.dry_run,
        backup: ctx.config.pull.backup_existing && !args.no_backup,
    })?;
    report::finish(ctx, &report)
}
