//! Level 2: echo what the run actually covered.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};

use super::CheckContext;
use crate::domain::evidence::CheckResult;
use crate::manifest::{DataType, Dataset};

/// Parse a date or timestamp cell into a sortable key.
pub(crate) fn parse_temporal(value: &Value, data_type: DataType) -> Option<NaiveDateTime> {
    let text = value.as_str()?;
    match data_type {
        DataType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
        DataType::Timestamp => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.naive_utc())
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").ok())
            .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").ok()),
        _ => None,
    }
}

fn date_range(ds: &Dataset, column: &str, data_type: DataType) -> (Option<(String, String)>, usize) {
    let mut unparsed = 0;
    let mut bounds: Option<(NaiveDateTime, NaiveDateTime)> = None;
    for value in ds.values(column).filter(|v| !v.is_null()) {
        match parse_temporal(value, data_type) {
            Some(t) => {
                bounds = Some(match bounds {
                    Some((lo, hi)) => (lo.min(t), hi.max(t)),
                    None => (t, t),
                })
            }
            None => unparsed += 1,
        }
    }
    let fmt = |t: NaiveDateTime| match data_type {
        DataType::Date => t.format("%Y-%m-%d").to_string(),
        _ => t.format("%Y-%m-%dT%H:%M:%S").to_string(),
    };
    (bounds.map(|(lo, hi)| (fmt(lo), fmt(hi))), unparsed)
}

pub fn run(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    let mut results = Vec::new();
    for ds in &ctx.datasets {
        let check = format!("scope.{}", ds.name);
        let Some(manifest) = ctx.manifests.get(&ds.name) else {
            results.push(CheckResult::fail(check, "manifest missing for dataset"));
            continue;
        };

        let mut ranges = BTreeMap::new();
        let mut unparsed_columns = Vec::new();
        for column in ds.columns.iter().filter(|c| c.data_type.is_temporal()) {
            let (range, unparsed) = date_range(ds, &column.name, column.data_type);
            if let Some((min, max)) = range {
                ranges.insert(column.name.clone(), json!({ "min": min, "max": max }));
            }
            if unparsed > 0 {
                unparsed_columns.push(format!("{} ({unparsed} unparseable)", column.name));
            }
        }

        let columns: BTreeMap<&str, Value> = manifest
            .column_stats
            .iter()
            .map(|(name, stats)| {
                let coverage = if manifest.row_count == 0 {
                    0.0
                } else {
                    1.0 - stats.null_rate(manifest.row_count)
                };
                (
                    name.as_str(),
                    json!({
                        "null_count": stats.null_count,
                        "distinct_count": stats.distinct_count,
                        "coverage": coverage,
                    }),
                )
            })
            .collect();

        let detail = format!(
            "{} row(s), {} column(s), fingerprint {}",
            manifest.row_count,
            manifest.schema.len(),
            &manifest.fingerprint[..12.min(manifest.fingerprint.len())]
        );
        let result = if unparsed_columns.is_empty() {
            CheckResult::pass(check, detail)
        } else {
            CheckResult::warn(check, format!("{detail}; {}", unparsed_columns.join(", ")))
        };
        results.push(
            result
                .with_attachment("fingerprint", json!(manifest.fingerprint))
                .with_attachment(
                    "coverage",
                    json!({
                        "row_count": manifest.row_count,
                        "column_count": manifest.schema.len(),
                        "columns": columns,
                    }),
                )
                .with_attachment("date_ranges", json!(ranges)),
        );
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::checks::testing::context;
    use crate::diagnostics::config::DiagnosticsConfig;
    use crate::domain::evidence::CheckStatus;
    use crate::manifest::ColumnSchema;

    #[test]
    fn test_date_range_and_coverage() {
        let mut ds = Dataset::new(
            "events",
            vec![
                ColumnSchema::new("day", DataType::Date),
                ColumnSchema::new("user", DataType::Text),
            ],
        );
        for (day, user) in [("2026-03-02", json!("a")), ("2026-01-15", Value::Null), ("2026-02-01", json!("b"))] {
            ds.push_row(json!({"day": day, "user": user})).expect("row");
        }
        let results = run(&context(vec![ds.into_handle()], DiagnosticsConfig::default()), &[]);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.status, CheckStatus::Pass);
        assert_eq!(r.attachments["coverage"]["row_count"], 3);
        assert_eq!(r.attachments["date_ranges"]["day"]["min"], "2026-01-15");
        assert_eq!(r.attachments["date_ranges"]["day"]["max"], "2026-03-02");
        let user_coverage = r.attachments["coverage"]["columns"]["user"]["coverage"]
            .as_f64()
            .expect("coverage");
        assert!((user_coverage - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unparseable_dates_warn() {
        let mut ds = Dataset::new("e", vec![ColumnSchema::new("day", DataType::Date)]);
        ds.push_row(json!({"day": "yesterday"})).expect("row");
        let results = run(&context(vec![ds.into_handle()], DiagnosticsConfig::default()), &[]);
        assert_eq!(results[0].status, CheckStatus::Warn);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_temporal(&json!("2026-01-01T10:00:00Z"), DataType::Timestamp).is_some());
        assert!(parse_temporal(&json!("2026-01-01 10:00:00"), DataType::Timestamp).is_some());
        assert!(parse_temporal(&json!(42), DataType::Date).is_none());
    }
}
