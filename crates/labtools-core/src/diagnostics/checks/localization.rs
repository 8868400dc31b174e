//! Level 4: where did the data change? Partition deltas and schema drift
//! against the recorded baseline.

use std::collections::BTreeSet;

use serde_json::json;

use super::CheckContext;
use crate::diagnostics::config::DriftSeverity;
use crate::domain::evidence::{CheckResult, CheckStatus};
use crate::manifest::{diff, PartitionStats};

fn with_severity(check: String, severity: DriftSeverity, detail: String) -> CheckResult {
    match severity.status() {
        CheckStatus::Pass => CheckResult::pass(check, format!("{detail} (ignored)")),
        CheckStatus::Warn => CheckResult::warn(check, detail),
        CheckStatus::Fail => CheckResult::fail(check, detail),
    }
}

pub fn partitions(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    let ratio = ctx.config.partition_delta_ratio;
    let mut results = Vec::new();
    for (name, current) in &ctx.manifests {
        let check = format!("localization.partitions.{name}");
        let Some(bounds) = &current.partition_bounds else {
            results.push(CheckResult::pass(check, "dataset is not partitioned"));
            continue;
        };
        let Some(base_bounds) = ctx
            .baselines
            .get(name)
            .and_then(|b| b.entry.partition_bounds.as_ref())
        else {
            results.push(CheckResult::pass(check, "no partitioned baseline to compare"));
            continue;
        };

        let keys: BTreeSet<&String> = bounds
            .partitions
            .keys()
            .chain(base_bounds.partitions.keys())
            .collect();
        let mut deltas = serde_json::Map::new();
        let mut changed = Vec::new();
        for key in &keys {
            let before = base_bounds.partitions.get(*key).copied().unwrap_or_default();
            let after = bounds.partitions.get(*key).copied().unwrap_or_default();
            let rows_delta = after.rows as i64 - before.rows as i64;
            let bytes_delta = after.bytes as i64 - before.bytes as i64;
            let appeared_or_vanished = (before == PartitionStats::default()) != (after == PartitionStats::default());
            let relative = rows_delta.unsigned_abs() as f64 / before.rows.max(1) as f64;
            if appeared_or_vanished || relative > ratio {
                changed.push((*key).clone());
            }
            if rows_delta != 0 || bytes_delta != 0 {
                deltas.insert(
                    (*key).clone(),
                    json!({
                        "baseline_rows": before.rows,
                        "current_rows": after.rows,
                        "rows_delta": rows_delta,
                        "bytes_delta": bytes_delta,
                    }),
                );
            }
        }

        let pattern = if changed.is_empty() {
            "stable"
        } else if changed.len() * 5 <= keys.len().max(1) || changed.len() == 1 {
            "clustered"
        } else {
            "uniform"
        };
        let result = if changed.is_empty() {
            CheckResult::pass(check, format!("{} partition(s) stable", keys.len()))
        } else {
            with_severity(
                check,
                ctx.config.drift.partition,
                format!(
                    "{} of {} partition(s) shifted ({pattern}): {}",
                    changed.len(),
                    keys.len(),
                    changed.join(", ")
                ),
            )
        };
        results.push(
            result
                .with_attachment("pattern", json!(pattern))
                .with_attachment("changed_partitions", json!(changed))
                .with_attachment("deltas", serde_json::Value::Object(deltas)),
        );
    }
    results
}

pub fn schema_drift(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    ctx.manifests
        .iter()
        .map(|(name, current)| {
            let check = format!("localization.schema.{name}");
            let Some(baseline) = ctx.baselines.get(name) else {
                return CheckResult::pass(check, "no baseline recorded");
            };
            let report = diff(&baseline.entry, current);
            let result = if report.has_schema_drift() {
                with_severity(
                    check,
                    ctx.config.drift.schema,
                    format!(
                        "schema drift: +{:?} -{:?} types {:?}",
                        report.added_columns,
                        report.removed_columns,
                        report
                            .type_changes
                            .iter()
                            .map(|t| format!("{}: {} -> {}", t.column, t.from, t.to))
                            .collect::<Vec<_>>()
                    ),
                )
            } else {
                CheckResult::pass(check, format!("schema unchanged; row delta {}", report.row_count_delta))
            };
            result.with_attachment("drift", json!(report))
        })
        .collect()
}
