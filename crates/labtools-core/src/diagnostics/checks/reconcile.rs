//! Level 6: headline metrics computed two independent ways must agree.
//!
//! The primary path folds over all rows at once; the secondary path builds
//! per-partition (or fixed-size chunk) subtotals and combines them.

use std::collections::{BTreeMap, HashSet};

use serde_json::{json, Value};

use super::CheckContext;
use crate::diagnostics::config::{Metric, Reconciliation};
use crate::domain::evidence::CheckResult;
use crate::manifest::{value_key, Dataset, Row};

fn numbers<'a, I>(rows: I, ds: &'a Dataset, column: &'a str) -> impl Iterator<Item = f64> + 'a
where
    I: Iterator<Item = &'a Row> + 'a,
{
    rows.filter_map(move |row| ds.value(row, column).as_f64())
}

fn primary(ds: &Dataset, metric: &Metric) -> f64 {
    match metric {
        Metric::RowCount => ds.row_count() as f64,
        Metric::Sum { column } => numbers(ds.rows.iter(), ds, column).sum(),
        Metric::Mean { column } => {
            let (sum, n) = numbers(ds.rows.iter(), ds, column).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                0.0
            } else {
                sum / n as f64
            }
        }
        Metric::DistinctCount { column } => ds
            .values(column)
            .filter(|v| !v.is_null())
            .map(value_key)
            .collect::<HashSet<_>>()
            .len() as f64,
    }
}

/// Group rows by partition key, or into fixed-size chunks when unpartitioned.
fn slices<'a>(ds: &'a Dataset, chunk_rows: usize) -> Vec<Vec<&'a Row>> {
    match &ds.partition_by {
        Some(column) => {
            let mut groups: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
            for row in &ds.rows {
                groups.entry(value_key(ds.value(row, column))).or_default().push(row);
            }
            groups.into_values().collect()
        }
        None => ds.rows.chunks(chunk_rows.max(1)).map(|c| c.iter().collect()).collect(),
    }
}

/// Kahan-compensated sum, so the secondary path differs in accumulation order
/// and technique from the primary one.
fn compensated_sum(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut carry = 0.0;
    for v in values {
        let y = v - carry;
        let t = sum + y;
        carry = (t - sum) - y;
        sum = t;
    }
    sum
}

fn secondary(ds: &Dataset, metric: &Metric, chunk_rows: usize) -> f64 {
    let parts = slices(ds, chunk_rows);
    match metric {
        Metric::RowCount => parts.iter().map(|p| p.len()).sum::<usize>() as f64,
        Metric::Sum { column } => compensated_sum(
            parts
                .iter()
                .map(|p| compensated_sum(numbers(p.iter().copied(), ds, column))),
        ),
        Metric::Mean { column } => {
            let (weighted, n) = parts.iter().fold((0.0, 0usize), |(acc, total), p| {
                let values: Vec<f64> = numbers(p.iter().copied(), ds, column).collect();
                if values.is_empty() {
                    return (acc, total);
                }
                let mean = compensated_sum(values.iter().copied()) / values.len() as f64;
                (acc + mean * values.len() as f64, total + values.len())
            });
            if n == 0 {
                0.0
            } else {
                weighted / n as f64
            }
        }
        Metric::DistinctCount { column } => {
            let mut union = HashSet::new();
            for part in &parts {
                union.extend(
                    part.iter()
                        .map(|row| ds.value(row, column))
                        .filter(|v| !v.is_null())
                        .map(value_key),
                );
            }
            union.len() as f64
        }
    }
}

fn default_reconciliations(ctx: &CheckContext) -> Vec<Reconciliation> {
    let mut out = Vec::new();
    for ds in &ctx.datasets {
        out.push(Reconciliation {
            dataset: ds.name.clone(),
            metric: Metric::RowCount,
        });
        for column in ds.columns.iter().filter(|c| c.data_type.is_numeric()) {
            out.push(Reconciliation {
                dataset: ds.name.clone(),
                metric: Metric::Sum {
                    column: column.name.clone(),
                },
            });
        }
    }
    out
}

pub fn run(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    let config = &ctx.config;
    let reconciliations = if config.reconciliations.is_empty() {
        default_reconciliations(ctx)
    } else {
        config.reconciliations.clone()
    };

    let mut by_dataset: BTreeMap<&str, Vec<&Reconciliation>> = BTreeMap::new();
    for r in &reconciliations {
        by_dataset.entry(r.dataset.as_str()).or_default().push(r);
    }

    let mut results = Vec::new();
    for (dataset, items) in by_dataset {
        let check = format!("reconcile.{dataset}");
        let Some(ds) = ctx.dataset(dataset) else {
            results.push(CheckResult::warn(check, format!("dataset {dataset} not supplied")));
            continue;
        };
        let mut ledger: Vec<Value> = Vec::new();
        let mut disagreements = Vec::new();
        for r in items {
            let a = primary(ds, &r.metric);
            let b = secondary(ds, &r.metric, config.reconcile_chunk_rows);
            let delta = (a - b).abs();
            let agreed = delta <= config.reconcile_tolerance * a.abs().max(1.0);
            if !agreed {
                disagreements.push(r.metric.label());
            }
            ledger.push(json!({
                "metric": r.metric.label(),
                "primary": a,
                "secondary": b,
                "delta": delta,
                "agreed": agreed,
            }));
        }
        let result = if disagreements.is_empty() {
            CheckResult::pass(check, format!("{} metric(s) reconciled", ledger.len()))
        } else {
            CheckResult::fail(check, format!("metrics disagree: {}", disagreements.join(", ")))
        };
        results.push(result.with_attachment("ledger", Value::Array(ledger)));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::checks::testing::context;
    use crate::diagnostics::config::DiagnosticsConfig;
    use crate::domain::evidence::CheckStatus;
    use crate::manifest::{ColumnSchema, DataType};

    fn payments(partitioned: bool) -> Dataset {
        let mut ds = Dataset::new(
            "payments",
            vec![
                ColumnSchema::new("branch", DataType::Text),
                ColumnSchema::new("amount", DataType::Float),
            ],
        );
        if partitioned {
            ds = ds.partitioned_by("branch");
        }
        for i in 0..2500 {
            let branch = ["north", "south", "east"][i % 3];
            ds.push_row(json!({"branch": branch, "amount": (i as f64) * 0.1})).expect("row");
        }
        ds
    }

    #[test]
    fn test_default_metrics_reconcile() {
        for partitioned in [false, true] {
            let ctx = context(vec![payments(partitioned).into_handle()], DiagnosticsConfig::default());
            let results = run(&ctx, &[]);
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].status, CheckStatus::Pass, "{}", results[0].detail);
            let ledger = results[0].attachments["ledger"].as_array().expect("ledger");
            assert_eq!(ledger.len(), 2);
            assert_eq!(ledger[0]["metric"], "row_count");
            assert_eq!(ledger[0]["primary"], 2500.0);
        }
    }

    #[test]
    fn test_explicit_mean_and_distinct() {
        let mut config = DiagnosticsConfig::default();
        config.reconciliations = vec![
            Reconciliation {
                dataset: "payments".into(),
                metric: Metric::Mean { column: "amount".into() },
            },
            Reconciliation {
                dataset: "payments".into(),
                metric: Metric::DistinctCount { column: "branch".into() },
            },
            Reconciliation {
                dataset: "missing".into(),
                metric: Metric::RowCount,
            },
        ];
        let ctx = context(vec![payments(true).into_handle()], config);
        let results = run(&ctx, &[]);
        let missing = results.iter().find(|r| r.name == "reconcile.missing").expect("missing");
        assert_eq!(missing.status, CheckStatus::Warn);
        let payments = results.iter().find(|r| r.name == "reconcile.payments").expect("payments");
        assert_eq!(payments.status, CheckStatus::Pass);
        assert_eq!(payments.attachments["ledger"][1]["primary"], 3.0);
    }
}
