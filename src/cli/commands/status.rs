//! substrate status - compare local skills with the last sync.

use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_json, robot_ok, short_hash, styled_status};
use crate::error::Result;
use crate::sync::{Journal, StatusReport, Synchronizer, UnitSyncStatus};

#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Also fetch the shared store and compare against it
    #[arg(long)]
    pub remote: bool,

    /// Number of recent journal events to show
    #[arg(long, default_value = "0")]
    pub history: usize,

    /// Wait for another substrate process to release the workspace (with --remote)
    #[arg(long)]
    pub wait: bool,
}

pub fn run(ctx: &AppContext, args: &StatusArgs) -> Result<()> {
    // Local status needs no store settings.
    let sync = if args.remote {
        ctx.synchronizer()?
    } else {
        Synchronizer::new(&ctx.config, &ctx.workspace, ctx.transport())
    };
    let _lock = if args.remote {
        Some(ctx.lock(args.wait)?)
    } else {
        None
    };
    let report = sync.status(args.remote)?;
    let history = if args.history > 0 {
        Journal::new(&ctx.config.state_dir(&ctx.workspace)).recent(args.history)?
    } else {
        Vec::new()
    };

    if ctx.robot_mode {
        return emit_json(&robot_ok(serde_json::json!({
            "status": report,
            "history": history,
        })));
    }

    let mut layout = render(&report);
    if !history.is_empty() {
        layout.blank().section("Recent runs");
        for event in &history {
            layout.bullet(&format!(
                "{}  {}  {}  {} unit(s)",
                event.ts.format("%Y-%m-%d %H:%M:%S"),
                event.event,
                event.verdict,
                event.units.len()
            ));
        }
    }
    emit_human(layout);
    Ok(())
}

fn render(report: &StatusReport) -> HumanLayout {
    let never = || "never".to_string();
    let mut layout = HumanLayout::new();
    layout.title("Substrate status");
    layout
        .kv("Workspace", &report.workspace.display().to_string())
        .kv("Install dir", &report.install_dir.display().to_string())
        .kv(
            "Last push",
            &report.last_push.map_or_else(never, |t| t.to_rfc3339()),
        )
        .kv(
            "Last pull",
            &report.last_pull.map_or_else(never, |t| t.to_rfc3339()),
        )
        .kv(
            "Checkpoint",
            report
                .last_source_reference
                .as_deref()
                .map_or("none", short_hash),
        );
    if report.remote_checked {
        layout.kv(
            "Store revision",
            report.remote_revision.as_deref().map_or("none", short_hash),
        );
    }
    layout.blank();

    if report.units.is_empty() {
        layout.push_line("No skills found.");
        return layout;
    }
    layout.section("Skills");
    let width = report.units.iter().map(|u| u.name.len()).max().unwrap_or(0);
    for unit in &report.units {
        let mut line = format!("{:width$}  {}", unit.name, styled_status(unit.status));
        if let Some(by) = &unit.pushed_by {
            line.push_str(&format!("  (store: {by})"));
        }
        if let Some(error) = &unit.error {
            line.push_str(&format!("  {error}"));
        }
        layout.push_line(line);
    }

    let drift = report.count(UnitSyncStatus::LocalDrift) + report.count(UnitSyncStatus::Untracked);
    if drift > 0 {
        layout
            .blank()
            .push_line(format!("{drift} skill(s) changed locally; `substrate push` to publish."));
    }
    if report.count(UnitSyncStatus::RemoteAhead) + report.count(UnitSyncStatus::RemoteOnly) > 0 {
        layout.push_line("The store has newer skills; `substrate pull` to install them.");
    }
    if !report.remote_checked {
        layout.push_line("Store not checked; use --remote to compare against it.");
    }
    layout
}
