//! Level 8: PII exposure and distribution drift.

use std::collections::BTreeMap;

use serde_json::json;

use super::CheckContext;
use crate::diagnostics::config::DriftSeverity;
use crate::domain::evidence::{CheckResult, CheckStatus};
use crate::manifest::DataType;

/// Counts matches per column and pattern. Matched values are never attached.
pub fn pii(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    ctx.datasets
        .iter()
        .map(|ds| {
            let check = format!("safety.pii.{}", ds.name);
            let mut hits: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
            let mut status = CheckStatus::Pass;
            for column in ds.columns.iter().filter(|c| c.data_type == DataType::Text) {
                for value in ds.values(&column.name) {
                    let Some(text) = value.as_str() else { continue };
                    for (pattern, re) in &ctx.pii {
                        if re.is_match(text) {
                            *hits
                                .entry(column.name.clone())
                                .or_default()
                                .entry(pattern.id.clone())
                                .or_default() += 1;
                            status = status.worst(pattern.severity.status());
                        }
                    }
                }
            }
            let detail = if hits.is_empty() {
                "no PII patterns matched".to_string()
            } else {
                format!(
                    "possible PII in column(s): {}",
                    hits.keys().cloned().collect::<Vec<_>>().join(", ")
                )
            };
            CheckResult::new(check, status, detail).with_attachment("matches", json!(hits))
        })
        .collect()
}

/// Mean shift and null-rate change per numeric column against the baseline.
pub fn distribution(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    let config = &ctx.config;
    ctx.manifests
        .iter()
        .map(|(name, current)| {
            let check = format!("safety.distribution.{name}");
            let Some(baseline) = ctx.baselines.get(name) else {
                return CheckResult::pass(check, "no baseline recorded");
            };
            let base = &baseline.entry;
            let mut drifted = Vec::new();
            let mut columns = BTreeMap::new();
            for (column, stats) in &current.column_stats {
                let Some(before) = base.column_stats.get(column) else { continue };
                let null_shift =
                    (stats.null_rate(current.row_count) - before.null_rate(base.row_count)).abs();
                let mean_shift = match (stats.numeric, before.numeric) {
                    (Some(now), Some(then)) => {
                        let spread = then.std_dev.max(f64::EPSILON);
                        Some((now.mean - then.mean).abs() / spread)
                    }
                    _ => None,
                };
                let flagged = null_shift > config.null_rate_delta
                    || mean_shift.is_some_and(|s| s > config.distribution_sigma);
                if flagged {
                    drifted.push(column.clone());
                }
                columns.insert(
                    column.clone(),
                    json!({
                        "null_rate_shift": null_shift,
                        "mean_shift_sigma": mean_shift,
                        "flagged": flagged,
                    }),
                );
            }
            let result = if drifted.is_empty() {
                CheckResult::pass(check, "distributions within thresholds")
            } else {
                let detail = format!("distribution drift in: {}", drifted.join(", "));
                match config.drift.distribution {
                    DriftSeverity::Ignore => CheckResult::pass(check, format!("{detail} (ignored)")),
                    DriftSeverity::Warn => CheckResult::warn(check, detail),
                    DriftSeverity::Fail => CheckResult::fail(check, detail),
                }
            };
            result.with_attachment("columns", json!(columns))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::checks::testing::context;
    use crate::diagnostics::config::DiagnosticsConfig;
    use crate::manifest::{build_manifest, ColumnSchema, Dataset, RecordedManifest};

    #[test]
    fn test_email_in_text_column_fails() {
        let mut ds = Dataset::new("contacts", vec![ColumnSchema::new("note", DataType::Text)]);
        ds.push_row(json!({"note": "reach me at ada@example.com"})).expect("row");
        ds.push_row(json!({"note": "no contact"})).expect("row");
        let results = pii(&context(vec![ds.into_handle()], DiagnosticsConfig::default()), &[]);
        assert_eq!(results[0].status, CheckStatus::Fail);
        assert_eq!(results[0].attachments["matches"]["note"]["email"], 1);
        let attached = serde_json::to_string(&results[0].attachments).expect("serialize");
        assert!(!attached.contains("ada@example.com"));
    }

    #[test]
    fn test_mean_shift_flagged() {
        let mut before = Dataset::new("m", vec![ColumnSchema::new("v", DataType::Float)]);
        for v in [9.0, 10.0, 11.0, 10.0] {
            before.push_row(json!({"v": v})).expect("row");
        }
        let mut after = Dataset::new("m", vec![ColumnSchema::new("v", DataType::Float)]);
        for v in [50.0, 51.0, 49.0, 50.0] {
            after.push_row(json!({"v": v})).expect("row");
        }
        let mut ctx = context(vec![after.into_handle()], DiagnosticsConfig::default());
        ctx.baselines.insert(
            "m".to_string(),
            RecordedManifest {
                identity: "unit.m".to_string(),
                run_id: "prior".to_string(),
                recorded_at: chrono::Utc::now(),
                entry: build_manifest(&before).expect("manifest"),
                checksum: None,
            },
        );
        let results = distribution(&ctx, &[]);
        assert_eq!(results[0].status, CheckStatus::Warn);
        assert_eq!(results[0].attachments["columns"]["v"]["flagged"], true);
    }
}
