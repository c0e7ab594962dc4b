//! substrate backup - inspect and restore the snapshots pull takes before overwriting.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use crate::app::AppContext;
use crate::backup::{BackupHandle, BackupManager};
use crate::bundler::hash_unit;
use crate::cli::output::{HumanLayout, emit_human, emit_json, robot_ok, short_hash};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// List backups, newest first
    List(BackupListArgs),
    /// Copy a backup back into the workspace
    Restore(BackupRestoreArgs),
}

#[derive(Args, Debug)]
pub struct BackupListArgs {
    /// Only show backups of this skill
    #[arg(long)]
    pub unit: Option<String>,

    /// Maximum number of backups to show
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct BackupRestoreArgs {
    /// Backup id, as shown by `backup list`
    pub id: String,

    /// Restore into this directory instead of the skill's install path
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Show what would be restored without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Wait for another substrate process to release the workspace
    #[arg(long)]
    pub wait: bool,
}

#[derive(Serialize)]
struct RestoreReport {
    backup: BackupHandle,
    target: PathBuf,
    /// Hash of whatever was at the target before restoring.
    #[serde(skip_serializing_if = "Option::is_none")]
    replaced_hash: Option<String>,
    dry_run: bool,
}

pub fn run(ctx: &AppContext, args: &BackupArgs) -> Result<()> {
    let manager = BackupManager::new(ctx.config.backup_dir(&ctx.workspace));
    match &args.command {
        BackupCommand::List(list) => run_list(ctx, &manager, list),
        BackupCommand::Restore(restore) => run_restore(ctx, &manager, restore),
    }
}

fn run_list(ctx: &AppContext, manager: &BackupManager, args: &BackupListArgs) -> Result<()> {
    let backups: Vec<BackupHandle> = manager
        .list()?
        .into_iter()
        .filter(|b| args.unit.as_ref().is_none_or(|unit| &b.unit == unit))
        .take(args.limit)
        .collect();

    if ctx.robot_mode {
        return emit_json(&robot_ok(serde_json::json!({
            "root": manager.root(),
            "count": backups.len(),
            "backups": backups,
        })));
    }

    if backups.is_empty() {
        println!("No backups found.");
        return Ok(());
    }
    let mut layout = HumanLayout::new();
    layout.title("Backups");
    for backup in &backups {
        layout.push_line(format!(
            "{}  {}  {} file(s)  {}",
            backup.id,
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            backup.files,
            short_hash(&backup.content_hash)
        ));
    }
    emit_human(layout);
    Ok(())
}

fn run_restore(ctx: &AppContext, manager: &BackupManager, args: &BackupRestoreArgs) -> Result<()> {
    let _lock = ctx.lock(args.wait)?;
    let handle = manager.find(&args.id)?;
    let target = args
        .target
        .clone()
        .unwrap_or_else(|| ctx.install_dir().join(&handle.unit));
    let replaced_hash = if target.is_dir() {
        hash_unit(&target).ok()
    } else {
        None
    };

    if !args.dry_run {
        manager.restore(&handle, &target)?;
    }
    let report = RestoreReport {
        backup: handle,
        target,
        replaced_hash,
        dry_run: args.dry_run,
    };

    if ctx.robot_mode {
        return emit_json(&robot_ok(&report));
    }
    let mut layout = HumanLayout::new();
    layout.title(if report.dry_run {
        "Restore (dry run)"
    } else {
        "Restored"
    });
    layout
        .kv("Backup", &report.backup.id)
        .kv("Skill", &report.backup.unit)
        .kv("Target", &report.target.display().to_string())
        .kv("Content hash", short_hash(&report.backup.content_hash));
    if let Some(previous) = &report.replaced_hash {
        layout.kv("Replaced", short_hash(previous));
    }
    emit_human(layout);
    Ok(())
}
