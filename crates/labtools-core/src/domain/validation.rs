//! Validation script results and their per-tier aggregation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Validation tier, taken from the first directory under the validation root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Unit,
    Integration,
    Governance,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Unit, Tier::Integration, Tier::Governance];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Unit => "unit",
            Tier::Integration => "integration",
            Tier::Governance => "governance",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" => Ok(Tier::Unit),
            "integration" => Ok(Tier::Integration),
            "governance" => Ok(Tier::Governance),
            other => Err(format!("unknown validation tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    Fail,
    Timeout,
    Error,
    Cancelled,
}

impl ValidationStatus {
    pub fn is_pass(self) -> bool {
        self == ValidationStatus::Pass
    }
}

/// Where a script's captured output lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputRef {
    File { path: PathBuf },
    Inline { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub tier: Tier,
    pub script_id: String,
    pub status: ValidationStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub output: OutputRef,
    #[serde(default)]
    pub attempts: u32,
}

impl ValidationResult {
    pub fn cancelled(tier: Tier, script_id: impl Into<String>) -> Self {
        Self {
            tier,
            script_id: script_id.into(),
            status: ValidationStatus::Cancelled,
            exit_code: None,
            duration_ms: 0,
            output: OutputRef::Inline {
                text: "run cancelled before script started".to_string(),
            },
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TierStatus {
    Pass,
    Fail,
}

impl fmt::Display for TierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TierStatus::Pass => "PASS",
            TierStatus::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
    pub cancelled: usize,
    pub duration_ms: u64,
}

impl TierSummary {
    /// Timeout, error and cancellation all count against the tier.
    pub fn status(&self) -> TierStatus {
        if self.passed == self.total {
            TierStatus::Pass
        } else {
            TierStatus::Fail
        }
    }

    fn record(&mut self, result: &ValidationResult) {
        self.total += 1;
        self.duration_ms += result.duration_ms;
        match result.status {
            ValidationStatus::Pass => self.passed += 1,
            ValidationStatus::Fail => self.failed += 1,
            ValidationStatus::Timeout => self.timed_out += 1,
            ValidationStatus::Error => self.errored += 1,
            ValidationStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub tiers: BTreeMap<Tier, TierSummary>,
}

impl ValidationSummary {
    pub fn tier_status(&self, tier: Tier) -> Option<TierStatus> {
        self.tiers.get(&tier).map(TierSummary::status)
    }

    pub fn failing_tiers(&self) -> Vec<Tier> {
        self.tiers
            .iter()
            .filter(|(_, s)| s.status() == TierStatus::Fail)
            .map(|(t, _)| *t)
            .collect()
    }

    /// PASS only when every tier that ran passed. An empty summary passes.
    pub fn overall(&self) -> TierStatus {
        if self.failing_tiers().is_empty() {
            TierStatus::Pass
        } else {
            TierStatus::Fail
        }
    }

    pub fn total(&self) -> usize {
        self.tiers.values().map(|s| s.total).sum()
    }
}

/// Fold results into per-tier counts.
pub fn aggregate(results: &[ValidationResult]) -> ValidationSummary {
    let mut summary = ValidationSummary::default();
    for result in results {
        summary.tiers.entry(result.tier).or_default().record(result);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(tier: Tier, id: &str, status: ValidationStatus) -> ValidationResult {
        ValidationResult {
            tier,
            script_id: id.to_string(),
            status,
            exit_code: None,
            duration_ms: 10,
            output: OutputRef::Inline { text: String::new() },
            attempts: 1,
        }
    }

    #[test]
    fn test_timeout_fails_its_tier_only() {
        let results = vec![
            result(Tier::Unit, "unit/a", ValidationStatus::Pass),
            result(Tier::Unit, "unit/b", ValidationStatus::Pass),
            result(Tier::Integration, "integration/slow", ValidationStatus::Timeout),
        ];
        let summary = aggregate(&results);
        assert_eq!(summary.tier_status(Tier::Unit), Some(TierStatus::Pass));
        assert_eq!(summary.tier_status(Tier::Integration), Some(TierStatus::Fail));
        assert_eq!(summary.tier_status(Tier::Governance), None);
        assert_eq!(summary.overall(), TierStatus::Fail);
        assert_eq!(summary.failing_tiers(), vec![Tier::Integration]);
        assert_eq!(summary.tiers[&Tier::Integration].timed_out, 1);
    }

    #[test]
    fn test_cancelled_counts_as_failure() {
        let summary = aggregate(&[ValidationResult::cancelled(Tier::Governance, "governance/x")]);
        assert_eq!(summary.overall(), TierStatus::Fail);
        assert_eq!(summary.tiers[&Tier::Governance].cancelled, 1);
    }

    #[test]
    fn test_empty_summary_passes() {
        let summary = aggregate(&[]);
        assert_eq!(summary.overall(), TierStatus::Pass);
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("governance".parse::<Tier>(), Ok(Tier::Governance));
        assert!("smoke".parse::<Tier>().is_err());
    }

    #[test]
    fn test_summary_json_uses_tier_keys() {
        let summary = aggregate(&[result(Tier::Unit, "unit/a", ValidationStatus::Pass)]);
        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["tiers"]["unit"]["passed"], 1);
    }
}
