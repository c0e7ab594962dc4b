//! substrate setup - environment checks and shared store initialisation.

use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_json, robot_ok};
use crate::config::{CONFIG_FILE, Config};
use crate::error::{Result, SubstrateError};
use crate::sync::{SeedReport, Synchronizer};
use crate::transport::Transport;
use crate::utils::fs::{ensure_dir, write_atomic};

#[derive(Args, Debug)]
pub struct SetupArgs {
    #[command(subcommand)]
    pub command: SetupCommand,
}

#[derive(Subcommand, Debug)]
pub enum SetupCommand {
    /// Check git, config, store reachability and the install dir
    Check,
    /// Write a project config and seed the shared store
    Init(SetupInitArgs),
}

#[derive(Args, Debug, Default)]
pub struct SetupInitArgs {
    /// Your identity (written to the project config if it does not exist)
    #[arg(long)]
    pub identity: Option<String>,

    /// The other workspace's identity
    #[arg(long)]
    pub partner: Option<String>,

    /// Shared store: path, URL or owner/name
    #[arg(long)]
    pub repo: Option<String>,

    /// Store branch
    #[arg(long)]
    pub branch: Option<String>,

    /// Create the remote first (local paths only)
    #[arg(long)]
    pub create_remote: bool,

    /// Show what would be done without doing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct CheckResult {
    name: &'static str,
    ok: bool,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, outcome: std::result::Result<String, String>) -> Self {
        match outcome {
            Ok(detail) => Self {
                name,
                ok: true,
                detail,
            },
            Err(detail) => Self {
                name,
                ok: false,
                detail,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct InitReport {
    dry_run: bool,
    /// Project config written (or that would be written).
    #[serde(skip_serializing_if = "Option::is_none")]
    config_written: Option<String>,
    remote_created: bool,
    install_dir_created: bool,
    store: SeedReport,
}

pub fn run(ctx: &AppContext, args: &SetupArgs) -> Result<()> {
    match &args.command {
        SetupCommand::Check => run_check(ctx),
        SetupCommand::Init(init) => run_init(ctx, init),
    }
}

fn run_check(ctx: &AppContext) -> Result<()> {
    let mut checks = vec![CheckResult::new(
        "git",
        which::which("git")
            .map(|path| path.display().to_string())
            .map_err(|_| "git not found on PATH".to_string()),
    )];

    let config = ctx.config.validate().map_err(|err| err.to_string());
    let config_ok = config.is_ok();
    checks.push(CheckResult::new(
        "config",
        config.map(|()| {
            format!(
                "{} <-> {} via {}",
                ctx.config.identity.name,
                ctx.config.partner.name,
                ctx.config.remote_url()
            )
        }),
    ));

    if config_ok {
        let transport = ctx.transport();
        let reachable = transport
            .sync_local_copy()
            .map(|store| {
                transport
                    .head_revision(&store)
                    .map_or_else(|| "reachable (empty)".to_string(), |rev| format!("reachable at {rev}"))
            })
            .map_err(|err| err.to_string());
        checks.push(CheckResult::new("remote", reachable));
    }

    let install_dir = ctx.install_dir();
    checks.push(CheckResult::new(
        "install dir",
        if install_dir.is_dir() {
            Ok(install_dir.display().to_string())
        } else {
            Err(format!("{} does not exist", install_dir.display()))
        },
    ));

    let ready = checks.iter().all(|c| c.ok);
    debug!(ready, checks = checks.len(), "setup check finished");
    if ctx.robot_mode {
        return emit_json(&robot_ok(serde_json::json!({
            "ready": ready,
            "checks": checks,
        })));
    }
    let mut layout = HumanLayout::new();
    layout.title("Setup check");
    for check in &checks {
        let mark = if check.ok {
            console::style("ok").green()
        } else {
            console::style("fail").red()
        };
        layout.push_line(format!("{:12} {mark:4}  {}", check.name, check.detail));
    }
    layout.blank().push_line(if ready {
        "Ready to sync."
    } else {
        "Fix the failing checks, then run `substrate setup init`."
    });
    emit_human(layout);
    Ok(())
}

fn run_init(ctx: &AppContext, args: &SetupInitArgs) -> Result<()> {
    let config = with_overrides(&ctx.config, args);
    config.validate()?;

    let project_path = Config::project_path(&ctx.workspace);
    let wants_config = args.identity.is_some() || args.partner.is_some() || args.repo.is_some();
    let config_written = if wants_config && !project_path.exists() {
        if !args.dry_run {
            write_atomic(&project_path, config.to_yaml()?.as_bytes())?;
            info!(path = %project_path.display(), "wrote project config");
        }
        Some(project_path.display().to_string())
    } else {
        if wants_config {
            debug!(path = %project_path.display(), "project config exists; leaving it alone");
        }
        None
    };

    let ctx = AppContext {
        config,
        config_path: ctx.config_path.clone(),
        workspace: ctx.workspace.clone(),
        robot_mode: ctx.robot_mode,
    };
    let _lock = ctx.lock(false)?;
    let transport = ctx.transport();
    if args.create_remote && !args.dry_run {
        transport.create_remote()?;
    }

    let install_dir = ctx.install_dir();
    let install_dir_created = !install_dir.exists();
    if install_dir_created && !args.dry_run {
        ensure_dir(&install_dir)?;
    }

    let sync = Synchronizer::new(&ctx.config, &ctx.workspace, transport);
    let store = sync.seed_store(args.dry_run).map_err(|err| match err {
        SubstrateError::Transport(reason) if !args.create_remote => SubstrateError::Transport(format!(
            "{reason} (pass --create-remote to create a local store)"
        )),
        other => other,
    })?;

    let report = InitReport {
        dry_run: args.dry_run,
        config_written,
        remote_created: args.create_remote,
        install_dir_created,
        store,
    };
    if ctx.robot_mode {
        return emit_json(&robot_ok(&report));
    }
    let mut layout = HumanLayout::new();
    layout.title(if report.dry_run {
        "Setup (dry run)"
    } else {
        "Setup complete"
    });
    if let Some(path) = &report.config_written {
        layout.kv(CONFIG_FILE, path);
    }
    layout.kv("Remote", &ctx.config.remote_url());
    if report.store.created.is_empty() {
        layout.push_line("Store already initialised.");
    } else {
        for file in &report.store.created {
            layout.bullet(&format!("store: {file}"));
        }
    }
    if report.install_dir_created {
        layout.bullet(&format!("created {}", install_dir.display()));
    }
    emit_human(layout);
    Ok(())
}

fn with_overrides(base: &Config, args: &SetupInitArgs) -> Config {
    let mut config = base.clone();
    if let Some(identity) = &args.identity {
        config.identity.name.clone_from(identity);
    }
    if let Some(partner) = &args.partner {
        config.partner.name.clone_from(partner);
    }
    if let Some(repo) = &args.repo {
        config.substrate.repo.clone_from(repo);
    }
    if let Some(branch) = &args.branch {
        config.substrate.branch.clone_from(branch);
    }
    config
}
