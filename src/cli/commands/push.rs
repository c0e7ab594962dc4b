//! substrate push - publish local skills to the shared store.

use clap::Args;

use crate::app::AppContext;
use crate::error::Result;
use crate::sync::PushOptions;

use super::report;
use super::split_names;

#[derive(Args, Debug, Default)]
pub struct PushArgs {
    /// Skills to push (comma-separated or repeated; default: configured or auto-detected set)
    #[arg(long, value_name = "NAMES")]
    pub skills: Vec<String>,

    /// Report what would be pushed without writing anything
    #[arg(long, conflicts_with = "retry_publish")]
    pub dry_run: bool,

    /// Re-publish the commit left by a push whose publish step failed
    #[arg(long)]
    pub retry_publish: bool,

    /// Wait for another substrate process to release the workspace
    #[arg(long)]
    pub wait: bool,
}

pub fn run(ctx: &AppContext, args: &PushArgs) -> Result<()> {
    let sync = ctx.synchronizer()?;
    let _lock = ctx.lock(args.wait)?;

    let report = if args.retry_publish {
        sync.retry_publish()?
    } else {
        sync.push(&PushOptions {
            units: split_names(&args.skills),
            dry_run: args.dry_run,
        })?
    };
    report::finish(ctx, &report)
}
