//! Named rulesets evaluated at level 5.
//!
//! Rules evaluate to PASS, FAIL or NA (not applicable, e.g. the dataset was
//! not supplied). The gate is ready when no applicable rule fails.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::manifest::{value_key, Dataset, DatasetHandle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    MinRowCount { min: u64 },
    MaxNullRate { column: String, max: f64 },
    UniqueKey { columns: Vec<String> },
    ValueRange {
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    AllowedValues { column: String, values: Vec<Value> },
    RequiredColumns { columns: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRule {
    pub id: String,
    pub dataset: String,
    pub check: RuleCheck,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<GovernanceRule>,
}

impl Ruleset {
    pub fn with_rule(mut self, id: &str, dataset: &str, check: RuleCheck) -> Self {
        self.rules.push(GovernanceRule {
            id: id.to_string(),
            dataset: dataset.to_string(),
            check,
            description: None,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOutcome {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "NA")]
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub dataset: String,
    pub outcome: RuleOutcome,
    pub detail: String,
}

fn outcome(ok: bool, detail: String) -> (RuleOutcome, String) {
    if ok {
        (RuleOutcome::Pass, detail)
    } else {
        (RuleOutcome::Fail, detail)
    }
}

fn missing_column(column: &str) -> (RuleOutcome, String) {
    (RuleOutcome::Fail, format!("column {column} not in schema"))
}

pub fn evaluate_rule(rule: &GovernanceRule, datasets: &[DatasetHandle]) -> RuleEvaluation {
    let (outcome, detail) = match datasets.iter().find(|d| d.name == rule.dataset) {
        None => (
            RuleOutcome::NotApplicable,
            format!("dataset {} not supplied", rule.dataset),
        ),
        Some(ds) => check(&rule.check, ds),
    };
    RuleEvaluation {
        rule_id: rule.id.clone(),
        dataset: rule.dataset.clone(),
        outcome,
        detail,
    }
}

fn check(rule: &RuleCheck, ds: &Dataset) -> (RuleOutcome, String) {
    let rows = ds.row_count() as u64;
    match rule {
        RuleCheck::MinRowCount { min } => outcome(rows >= *min, format!("{rows} rows (min {min})")),
        RuleCheck::MaxNullRate { column, max } => {
            if !ds.has_column(column) {
                return missing_column(column);
            }
            if rows == 0 {
                return (RuleOutcome::NotApplicable, "dataset is empty".to_string());
            }
            let nulls = ds.values(column).filter(|v| v.is_null()).count();
            let rate = nulls as f64 / rows as f64;
            outcome(rate <= *max, format!("null rate {rate:.4} (max {max})"))
        }
        RuleCheck::UniqueKey { columns } => {
            if let Some(missing) = columns.iter().find(|c| !ds.has_column(c)) {
                return missing_column(missing);
            }
            let mut seen = HashSet::new();
            let duplicates = ds
                .rows
                .iter()
                .filter(|row| {
                    let key: Vec<String> = columns.iter().map(|c| value_key(ds.value(row, c))).collect();
                    !seen.insert(key)
                })
                .count();
            outcome(duplicates == 0, format!("{duplicates} duplicate key(s)"))
        }
        RuleCheck::ValueRange { column, min, max } => {
            if !ds.has_column(column) {
                return missing_column(column);
            }
            let out_of_range = ds
                .values(column)
                .filter(|v| !v.is_null())
                .filter(|v| match v.as_f64() {
                    Some(n) => min.is_some_and(|lo| n < lo) || max.is_some_and(|hi| n > hi),
                    None => true,
                })
                .count();
            outcome(out_of_range == 0, format!("{out_of_range} value(s) out of range"))
        }
        RuleCheck::AllowedValues { column, values } => {
            if !ds.has_column(column) {
                return missing_column(column);
            }
            let allowed: HashSet<String> = values.iter().map(value_key).collect();
            let mut unexpected: Vec<String> = ds
                .values(column)
                .filter(|v| !v.is_null())
                .map(value_key)
                .filter(|k| !allowed.contains(k))
                .collect();
            unexpected.sort();
            unexpected.dedup();
            outcome(
                unexpected.is_empty(),
                if unexpected.is_empty() {
                    "all values allowed".to_string()
                } else {
                    format!("unexpected values: {}", unexpected.join(", "))
                },
            )
        }
        RuleCheck::RequiredColumns { columns } => {
            let missing: Vec<&str> = columns
                .iter()
                .filter(|c| !ds.has_column(c))
                .map(String::as_str)
                .collect();
            outcome(
                missing.is_empty(),
                if missing.is_empty() {
                    "all required columns present".to_string()
                } else {
                    format!("missing columns: {}", missing.join(", "))
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ColumnSchema, DataType};
    use serde_json::json;

    fn accounts() -> DatasetHandle {
        let mut ds = Dataset::new(
            "accounts",
            vec![
                ColumnSchema::new("id", DataType::Integer),
                ColumnSchema::new("tier", DataType::Text),
                ColumnSchema::new("balance", DataType::Float),
            ],
        );
        ds.push_row(json!({"id": 1, "tier": "gold", "balance": 10.0})).expect("row");
        ds.push_row(json!({"id": 2, "tier": "silver", "balance": null})).expect("row");
        ds.push_row(json!({"id": 2, "tier": "bronze", "balance": -5.0})).expect("row");
        ds.into_handle()
    }

    fn eval(check: RuleCheck) -> RuleOutcome {
        let rule = GovernanceRule {
            id: "r".to_string(),
            dataset: "accounts".to_string(),
            check,
            description: None,
        };
        evaluate_rule(&rule, &[accounts()]).outcome
    }

    #[test]
    fn test_rule_outcomes() {
        assert_eq!(eval(RuleCheck::MinRowCount { min: 3 }), RuleOutcome::Pass);
        assert_eq!(
            eval(RuleCheck::MaxNullRate { column: "balance".into(), max: 0.1 }),
            RuleOutcome::Fail
        );
        assert_eq!(
            eval(RuleCheck::UniqueKey { columns: vec!["id".into()] }),
            RuleOutcome::Fail
        );
        assert_eq!(
            eval(RuleCheck::ValueRange { column: "balance".into(), min: Some(0.0), max: None }),
            RuleOutcome::Fail
        );
        assert_eq!(
            eval(RuleCheck::AllowedValues {
                column: "tier".into(),
                values: vec![json!("gold"), json!("silver"), json!("bronze")],
            }),
            RuleOutcome::Pass
        );
        assert_eq!(
            eval(RuleCheck::RequiredColumns { columns: vec!["id".into(), "owner".into()] }),
            RuleOutcome::Fail
        );
    }

    #[test]
    fn test_missing_dataset_is_not_applicable() {
        let rule = GovernanceRule {
            id: "r".to_string(),
            dataset: "ledger".to_string(),
            check: RuleCheck::MinRowCount { min: 1 },
            description: None,
        };
        assert_eq!(evaluate_rule(&rule, &[accounts()]).outcome, RuleOutcome::NotApplicable);
    }

    #[test]
    fn test_ruleset_from_toml() {
        let ruleset: Ruleset = toml::from_str(
            r#"
            [[rules]]
            id = "accounts_not_empty"
            dataset = "accounts"
            check = { kind = "min_row_count", min = 1 }
            "#,
        )
        .expect("parse");
        assert_eq!(ruleset.rules[0].check, RuleCheck::MinRowCount { min: 1 });
    }
}
