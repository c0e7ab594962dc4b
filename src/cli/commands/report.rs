//! Rendering of push/pull run reports.

use crate::app::AppContext;
use crate::cli::output::{
    HumanLayout, emit_human, emit_json, robot_failure, robot_ok, robot_partial, short_hash,
    styled_outcome, styled_verdict,
};
use crate::error::{Result, SubstrateError};
use crate::sync::{SyncReport, UnitOutcome, Verdict};

/// Print the report, then turn a non-successful verdict into an error so
/// the process exits non-zero.
pub fn finish(ctx: &AppContext, report: &SyncReport) -> Result<()> {
    if ctx.robot_mode {
        emit_robot(report)?;
    } else {
        emit_human(render(report));
    }
    if report.is_success() {
        Ok(())
    } else {
        Err(SubstrateError::RunFailed {
            failed: report.failed,
        })
    }
}

fn emit_robot(report: &SyncReport) -> Result<()> {
    let warnings = report.warnings.clone();
    match report.verdict {
        Verdict::Success => emit_json(&robot_ok(report).with_warnings(warnings)),
        Verdict::PartialFailure => {
            let completed = report.units.len() - report.failed;
            emit_json(&robot_partial(completed, report.failed, report).with_warnings(warnings))
        }
        Verdict::PublishFailed => {
            let err = SubstrateError::PublishFailed {
                revision: report.revision.clone().unwrap_or_default(),
                reason: report.error.clone().unwrap_or_default(),
            };
            emit_json(&robot_failure(&err, report).with_warnings(warnings))
        }
        Verdict::Failed => {
            let err = SubstrateError::RunFailed {
                failed: report.failed,
            };
            emit_json(&robot_failure(&err, report).with_warnings(warnings))
        }
    }
}

fn render(report: &SyncReport) -> HumanLayout {
    let mut layout = HumanLayout::new();
    let title = if report.dry_run {
        format!("{} (dry run)", capitalize(&report.kind.to_string()))
    } else {
        capitalize(&report.kind.to_string())
    };
    layout.title(&title);
    layout.kv("Run", &report.run_id);
    if let Some(base) = &report.base_revision {
        layout.kv("Store revision", short_hash(base));
    }
    if let Some(revision) = &report.revision {
        layout.kv("New revision", short_hash(revision));
    }
    layout.kv("Duration (ms)", &report.duration_ms.to_string());
    layout.blank();

    if report.units.is_empty() {
        layout.push_line("No units selected.");
    } else {
        layout.section("Units");
        let width = report.units.iter().map(|u| u.name.len()).max().unwrap_or(0);
        for unit in &report.units {
            let mut line = format!(
                "{:width$}  {}",
                unit.name,
                styled_outcome(unit.outcome),
            );
            if let Some(hash) = unit.local_hash.as_deref().or(unit.remote_hash.as_deref()) {
                line.push_str(&format!("  {}", short_hash(hash)));
            }
            if let Some(backup) = &unit.backup_id {
                line.push_str(&format!("  backup: {backup}"));
            }
            if unit.outcome == UnitOutcome::Failed
                && let Some(error) = &unit.error
            {
                line.push_str(&format!("  {error}"));
            }
            layout.push_line(line);
        }
    }

    if !report.conflicts.is_empty() {
        layout.blank().section("Conflicts");
        for conflict in &report.conflicts {
            layout.bullet(&conflict.to_string());
        }
    }
    if !report.warnings.is_empty() {
        layout.blank().section("Warnings");
        for warning in &report.warnings {
            layout.bullet(warning);
        }
    }

    layout.blank();
    layout.push_line(format!(
        "{}  ({})",
        report.summary_line(),
        styled_verdict(report.verdict)
    ));
    if report.verdict == Verdict::PublishFailed {
        if let Some(error) = &report.error {
            layout.push_line(error.clone());
        }
        layout.push_line("Retry with `substrate push --retry-publish`.");
    }
    layout
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + chars.as_str()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Decision, RunKind, RunPhase, SyncRun};

    fn report() -> SyncReport {
        let mut run = SyncRun::new(RunKind::Pull, false);
        for phase in [RunPhase::StoreSynced, RunPhase::ManifestLoaded, RunPhase::Diffing] {
            run.advance(phase).unwrap();
        }
        let ok = run.add_unit("alpha", Decision::Create, None, Some("sha256:aa".into()));
        let bad = run.add_unit("beta", Decision::Update, None, None);
        run.advance(RunPhase::Applying).unwrap();
        run.settle(ok, UnitOutcome::Created).unwrap();
        run.settle_failed(bad, &SubstrateError::UnitApply {
            unit: "beta".into(),
            reason: "disk full".into(),
        })
        .unwrap();
        run.advance(RunPhase::Completed).unwrap();
        run.finish()
    }

    #[test]
    fn human_report_lists_failures() {
        let text = console::strip_ansi_codes(&render(&report()).build()).to_string();
        assert!(text.starts_with("Pull"));
        assert!(text.contains("alpha"));
        assert!(text.contains("disk full"));
        assert!(text.contains("1 created, 0 updated, 0 no-op, 1 failed"));
    }

    #[test]
    fn capitalize_first_letter() {
        assert_eq!(capitalize("push"), "Push");
        assert_eq!(capitalize(""), "");
    }
}
