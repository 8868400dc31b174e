use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use crate::domain::evidence::CheckStatus;
use crate::domain::validation::OutputRef;

use super::report::BuildReport;

pub const REPORT_MARKDOWN: &str = "build_report.md";
pub const REPORT_JSON: &str = "build_report.json";

/// Render the reviewer-facing markdown summary.
pub fn render_markdown(report: &BuildReport) -> String {
    let run = report.run();
    let evidence = report.evidence();
    let mut out = String::new();

    out.push_str(&format!("# Build Report `{}`\n\n", report.report_id()));
    out.push_str("## Run\n");
    out.push_str(&format!(
        "- run: `{}`\n- project: {}\n- environment: {}\n- ruleset: {}\n- diagnostics level: {}\n- code version: `{}`\n- artifacts: {}\n- audit events: {}\n- policy violations: {}\n",
        run.run_id,
        run.project,
        run.environment,
        run.ruleset,
        run.diag_level,
        run.code_version,
        run.artifacts.len(),
        run.audit_events,
        run.policy_violations,
    ));
    if let Some(prior) = &run.prior_run_id {
        out.push_str(&format!("- retry of: `{prior}`\n"));
    }
    out.push('\n');

    out.push_str(&format!("## Evidence: {}\n", evidence.status));
    out.push_str(&format!(
        "- levels executed: {:?}\n- pass: {}\n- warn: {}\n- fail: {}\n\n",
        evidence.levels_executed,
        evidence.count(CheckStatus::Pass),
        evidence.count(CheckStatus::Warn),
        evidence.count(CheckStatus::Fail),
    ));
    let flagged: Vec<_> = evidence
        .checks
        .iter()
        .filter(|c| c.status != CheckStatus::Pass)
        .collect();
    if !flagged.is_empty() {
        out.push_str("| level | check | status | detail |\n|---|---|---|---|\n");
        for check in flagged {
            out.push_str(&format!(
                "| {} | `{}` | {} | {} |\n",
                check.level,
                check.name,
                check.status,
                check.detail.replace('|', "\\|")
            ));
        }
        out.push('\n');
    }

    let summary = report.validation_summary();
    out.push_str(&format!("## Validation: {}\n", summary.overall()));
    if summary.tiers.is_empty() {
        out.push_str("- no scripts executed\n");
    }
    for (tier, counts) in &summary.tiers {
        out.push_str(&format!(
            "- {tier}: {} ({}/{} passed, {} failed, {} timed out, {} errored, {} cancelled)\n",
            counts.status(),
            counts.passed,
            counts.total,
            counts.failed,
            counts.timed_out,
            counts.errored,
            counts.cancelled,
        ));
    }
    for result in report.validation_results().iter().filter(|r| !r.status.is_pass()) {
        let output = match &result.output {
            OutputRef::File { path } => format!("`{}`", path.display()),
            OutputRef::Inline { .. } => "inline".to_string(),
        };
        out.push_str(&format!(
            "  - `{}` {:?} after {} ms, output {}\n",
            result.script_id, result.status, result.duration_ms, output
        ));
    }
    out.push('\n');

    if let Some(diff) = report.manifest_diff() {
        out.push_str("## Manifest drift\n");
        if !diff.has_drift() {
            out.push_str("- none\n");
        }
        for name in &diff.added_datasets {
            out.push_str(&format!("- added dataset `{name}`\n"));
        }
        for name in &diff.removed_datasets {
            out.push_str(&format!("- removed dataset `{name}`\n"));
        }
        for drift in diff.drifts.values().filter(|d| !d.is_clean()) {
            out.push_str(&format!(
                "- `{}`: +{:?} -{:?} rows {:+} fingerprint {}\n",
                drift.dataset,
                drift.added_columns,
                drift.removed_columns,
                drift.row_count_delta,
                if drift.fingerprint_changed { "changed" } else { "same" },
            ));
        }
        out.push('\n');
    }

    out.push_str("## Gate\n");
    let blockers = report.gate_blockers();
    if blockers.is_empty() {
        out.push_str("- ready for approval\n");
    }
    for reason in &blockers {
        out.push_str(&format!("- blocked: {reason}\n"));
    }
    if let Some(approval) = report.approval() {
        out.push_str(&format!(
            "- approved by {} at {}\n",
            approval.reviewer,
            approval.approved_at.to_rfc3339()
        ));
    }
    if let Some(rejection) = report.rejection() {
        out.push_str(&format!(
            "- rejected by {} at {}: {}\n",
            rejection.reviewer,
            rejection.rejected_at.to_rfc3339(),
            rejection.reason
        ));
    }
    out.push_str(&format!("\ndigest: `{}`\n", report.digest()));
    out
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).with_context(|| format!("create temp file in {:?}", dir))?;
    tmp.write_all(bytes).context("write report")?;
    tmp.persist(path).with_context(|| format!("persist {:?}", path))?;
    Ok(())
}

/// Write `build_report.md` and `build_report.json` under `dir`.
pub fn write_report(dir: &Path, report: &BuildReport) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
    let md = dir.join(REPORT_MARKDOWN);
    let json = dir.join(REPORT_JSON);
    write_atomic(&md, render_markdown(report).as_bytes())?;
    let content = serde_json::to_vec_pretty(report).context("serialize build report")?;
    write_atomic(&json, &content)?;
    Ok((md, json))
}
