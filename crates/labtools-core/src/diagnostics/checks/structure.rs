//! Level 1: required datasets and columns exist; datasets are non-empty.

use serde_json::json;

use super::CheckContext;
use crate::domain::evidence::CheckResult;

pub fn run(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (name, columns) in &ctx.config.required {
        let check = format!("structure.required.{name}");
        let Some(ds) = ctx.dataset(name) else {
            results.push(CheckResult::fail(check, format!("required dataset {name} not supplied")));
            continue;
        };
        let missing: Vec<&String> = columns.iter().filter(|c| !ds.has_column(c)).collect();
        results.push(if missing.is_empty() {
            CheckResult::pass(check, format!("{} required column(s) present", columns.len()))
        } else {
            CheckResult::fail(check, format!("missing required column(s): {missing:?}"))
                .with_attachment("missing_columns", json!(missing))
        });
    }

    if ctx.datasets.is_empty() {
        results.push(CheckResult::warn("structure.datasets", "no datasets supplied"));
    }

    for ds in &ctx.datasets {
        let check = format!("structure.non_empty.{}", ds.name);
        let rows = ds.row_count();
        results.push(if rows > 0 {
            CheckResult::pass(check, format!("{rows} row(s)"))
        } else if ctx.config.allow_empty.contains(&ds.name) {
            CheckResult::pass(check, "empty, explicitly allowed")
        } else {
            CheckResult::fail(check, "dataset is empty")
        });
    }
    results
}
