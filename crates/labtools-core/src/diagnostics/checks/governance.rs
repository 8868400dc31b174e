//! Level 5: governance snapshot and gate readiness.

use serde_json::json;

use super::CheckContext;
use crate::diagnostics::governance::{evaluate_rule, RuleOutcome};
use crate::domain::evidence::CheckResult;

pub fn run(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    let check = "governance.snapshot";
    let Some(ruleset) = ctx.ruleset.as_ref().filter(|r| !r.rules.is_empty()) else {
        return vec![CheckResult::pass(
            check,
            format!("ruleset {} defines no rules; gate ready", ctx.run.ruleset),
        )
        .with_attachment("gate_ready", json!(true))
        .with_attachment("matrix", json!([]))];
    };

    let matrix: Vec<_> = ruleset
        .rules
        .iter()
        .map(|rule| evaluate_rule(rule, &ctx.datasets))
        .collect();
    let failing: Vec<&str> = matrix
        .iter()
        .filter(|e| e.outcome == RuleOutcome::Fail)
        .map(|e| e.rule_id.as_str())
        .collect();
    let count = |o: RuleOutcome| matrix.iter().filter(|e| e.outcome == o).count();
    let summary = json!({
        "pass": count(RuleOutcome::Pass),
        "fail": count(RuleOutcome::Fail),
        "na": count(RuleOutcome::NotApplicable),
    });

    let result = if failing.is_empty() {
        CheckResult::pass(
            check,
            format!("{} rule(s) evaluated; gate ready", matrix.len()),
        )
    } else {
        CheckResult::fail(
            check,
            format!("{} rule(s) failing: {}", failing.len(), failing.join(", ")),
        )
    };
    vec![result
        .with_attachment("gate_ready", json!(failing.is_empty()))
        .with_attachment("summary", summary)
        .with_attachment("matrix", json!(matrix))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::checks::testing::context;
    use crate::diagnostics::config::DiagnosticsConfig;
    use crate::diagnostics::governance::{RuleCheck, Ruleset};
    use crate::domain::evidence::CheckStatus;
    use crate::manifest::{ColumnSchema, DataType, Dataset};

    #[test]
    fn test_failing_rule_blocks_gate() {
        let mut ds = Dataset::new("loans", vec![ColumnSchema::new("rate", DataType::Float)]);
        ds.push_row(json!({"rate": 0.4})).expect("row");
        let mut ctx = context(vec![ds.into_handle()], DiagnosticsConfig::default());
        ctx.ruleset = Some(
            Ruleset::default()
                .with_rule("loans_present", "loans", RuleCheck::MinRowCount { min: 1 })
                .with_rule(
                    "rate_cap",
                    "loans",
                    RuleCheck::ValueRange { column: "rate".into(), min: Some(0.0), max: Some(0.25) },
                )
                .with_rule("ledger_present", "ledger", RuleCheck::MinRowCount { min: 1 }),
        );
        let results = run(&ctx, &[]);
        let snapshot = &results[0];
        assert_eq!(snapshot.status, CheckStatus::Fail);
        assert_eq!(snapshot.attachments["gate_ready"], false);
        assert_eq!(snapshot.attachments["summary"]["na"], 1);
        assert_eq!(snapshot.attachments["matrix"][1]["outcome"], "FAIL");
    }

    #[test]
    fn test_empty_ruleset_is_ready() {
        let ctx = context(Vec::new(), DiagnosticsConfig::default());
        let results = run(&ctx, &[]);
        assert_eq!(results[0].status, CheckStatus::Pass);
        assert_eq!(results[0].attachments["gate_ready"], true);
    }
}
