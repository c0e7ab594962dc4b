//! substrate bundle - single-skill archives.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::app::AppContext;
use crate::bundler::{Bundle, PackOptions, ValidationReport, hash_unit, validate_bundle};
use crate::cli::output::{HumanLayout, emit_human, emit_json, robot_ok, short_hash};
use crate::context::scanner::{ContentUnit, discover_units, is_valid_unit_name};
use crate::error::{Result, SubstrateError};

#[derive(Args, Debug)]
pub struct BundleArgs {
    #[command(subcommand)]
    pub command: BundleCommand,
}

#[derive(Subcommand, Debug)]
pub enum BundleCommand {
    /// Package one skill into a .tar.gz bundle
    #[command(disable_version_flag = true)]
    Create(BundleCreateArgs),
    /// Check a bundle's structure and checksums
    Validate(BundleValidateArgs),
    /// List the skills in this workspace
    List,
}

#[derive(Args, Debug)]
pub struct BundleCreateArgs {
    /// Skill name (directory under the install dir)
    pub unit: String,

    /// Output directory (default: <tmp>/substrate-bundles)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Bundle version (default: the skill's descriptor version)
    #[arg(long)]
    pub version: Option<String>,

    /// Free-form notes stored in the bundle metadata
    #[arg(long)]
    pub notes: Option<String>,

    /// Pack in memory and report, without writing the file
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct BundleValidateArgs {
    /// Bundle file
    pub path: PathBuf,
}

#[derive(Serialize)]
struct BundleCreateReport {
    unit: String,
    version: String,
    path: PathBuf,
    content_hash: String,
    archive_digest: String,
    files: usize,
    bytes: usize,
    dry_run: bool,
}

#[derive(Serialize)]
struct BundleListEntry {
    name: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    has_scripts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_hash: Option<String>,
}

#[derive(Serialize)]
struct BundleListReport {
    install_dir: PathBuf,
    count: usize,
    units: Vec<BundleListEntry>,
}

pub fn run(ctx: &AppContext, args: &BundleArgs) -> Result<()> {
    match &args.command {
        BundleCommand::Create(create) => run_create(ctx, create),
        BundleCommand::Validate(validate) => run_validate(ctx, validate),
        BundleCommand::List => run_list(ctx),
    }
}

fn run_create(ctx: &AppContext, args: &BundleCreateArgs) -> Result<()> {
    if !is_valid_unit_name(&args.unit) {
        return Err(SubstrateError::InvalidUnit(format!(
            "invalid skill name: {:?}",
            args.unit
        )));
    }
    let path = ctx.install_dir().join(&args.unit);
    let unit = ContentUnit::from_dir(&path).ok_or_else(|| SubstrateError::UnitNotFound(args.unit.clone()))?;

    let version = args.version.clone().unwrap_or_else(|| unit.version());
    semver::Version::parse(&version).map_err(|err| {
        SubstrateError::InvalidBundle(format!("version {version:?} is not semver: {err}"))
    })?;

    let identity = ctx.config.identity.name.trim();
    let bundle = Bundle::pack(
        &unit.path,
        &unit.name,
        &PackOptions {
            version: Some(version.clone()),
            exported_from: (!identity.is_empty()).then(|| identity.to_string()),
            notes: args.notes.clone(),
            created_at: None,
        },
    )?;

    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("substrate-bundles"));
    let target = output_dir.join(bundle_file_name(&unit.name, &version));
    if !args.dry_run {
        bundle.write_to(&target)?;
        info!(unit = %unit.name, path = %target.display(), "wrote bundle");
    }

    let report = BundleCreateReport {
        unit: unit.name,
        version,
        path: target,
        content_hash: bundle.content_hash().to_string(),
        archive_digest: bundle.archive_digest(),
        files: bundle.metadata().files.len(),
        bytes: bundle.bytes().len(),
        dry_run: args.dry_run,
    };

    if ctx.robot_mode {
        return emit_json(&robot_ok(&report));
    }
    let mut layout = HumanLayout::new();
    layout.title(if report.dry_run {
        "Bundle (dry run)"
    } else {
        "Bundle created"
    });
    layout
        .kv("Skill", &report.unit)
        .kv("Version", &report.version)
        .kv("Path", &report.path.display().to_string())
        .kv("Files", &report.files.to_string())
        .kv("Size (bytes)", &report.bytes.to_string())
        .kv("Content hash", &report.content_hash);
    emit_human(layout);
    Ok(())
}

fn run_validate(ctx: &AppContext, args: &BundleValidateArgs) -> Result<()> {
    let report = validate_bundle(&args.path);
    if ctx.robot_mode {
        emit_json(&robot_ok(&report))?;
    } else {
        emit_human(render_validation(&report));
    }
    if report.valid {
        Ok(())
    } else {
        Err(SubstrateError::InvalidBundle(
            report
                .errors
                .first()
                .cloned()
                .unwrap_or_else(|| args.path.display().to_string()),
        ))
    }
}

fn render_validation(report: &ValidationReport) -> HumanLayout {
    let mut layout = HumanLayout::new();
    layout.title(if report.valid {
        "Bundle valid"
    } else {
        "Bundle invalid"
    });
    layout.kv("Path", &report.path.display().to_string());
    if let Some(name) = &report.name {
        layout.kv("Skill", name);
    }
    if let Some(hash) = &report.content_hash {
        layout.kv("Content hash", hash);
    }
    layout.kv("Files", &report.file_count.to_string());
    for error in &report.errors {
        layout.bullet(&format!("error: {error}"));
    }
    for warning in &report.warnings {
        layout.bullet(&format!("warning: {warning}"));
    }
    layout
}

fn run_list(ctx: &AppContext) -> Result<()> {
    let install_dir = ctx.install_dir();
    let units = discover_units(&install_dir)?;
    let entries: Vec<BundleListEntry> = units
        .into_par_iter()
        .map(|unit| BundleListEntry {
            version: unit.version(),
            content_hash: hash_unit(&unit.path).ok(),
            description: unit.descriptor.description,
            has_scripts: unit.has_scripts,
            name: unit.name,
        })
        .collect();
    let report = BundleListReport {
        install_dir,
        count: entries.len(),
        units: entries,
    };

    if ctx.robot_mode {
        return emit_json(&robot_ok(&report));
    }
    if report.units.is_empty() {
        println!("No skills found in {}.", report.install_dir.display());
        return Ok(());
    }
    let mut layout = HumanLayout::new();
    layout.title(&format!("Skills in {}", report.install_dir.display()));
    let width = report.units.iter().map(|u| u.name.len()).max().unwrap_or(0);
    for unit in &report.units {
        let mut line = format!("{:width$}  v{}", unit.name, unit.version);
        if let Some(hash) = &unit.content_hash {
            line.push_str(&format!("  {}", short_hash(hash)));
        }
        if unit.has_scripts {
            line.push_str("  [scripts]");
        }
        layout.push_line(line);
    }
    emit_human(layout);
    Ok(())
}

fn bundle_file_name(unit: &str, version: &str) -> String {
    format!("{unit}-v{version}-{}.tar.gz", Utc::now().format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    #[test]
    fn create_takes_bundle_version() {
        let cli = Cli::try_parse_from(["substrate", "bundle", "create", "foo", "--version", "2.1.0"])
            .unwrap();
        let Commands::Bundle(BundleArgs {
            command: BundleCommand::Create(args),
        }) = cli.command
        else {
            panic!("expected bundle create");
        };
        assert_eq!(args.unit, "foo");
        assert_eq!(args.version.as_deref(), Some("2.1.0"));
    }

    #[test]
    fn file_name_carries_version_and_date() {
        let name = bundle_file_name("foo", "1.2.0");
        assert!(name.starts_with("foo-v1.2.0-"));
        let date = name
            .trim_start_matches("foo-v1.2.0-")
            .trim_end_matches(".tar.gz");
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
    }
}
