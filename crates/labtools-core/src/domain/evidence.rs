//! Diagnostics evidence: individual check results and the aggregated bundle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::level::DiagnosticsLevel;

/// Outcome of a check. Ordering is by severity: `Pass < Warn < Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn worst(self, other: CheckStatus) -> CheckStatus {
        self.max(other)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub level: u8,
    /// Check group that produced this result.
    pub group: String,
    /// Stable name, unique within a bundle.
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
    #[serde(default)]
    pub attachments: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default = "one")]
    pub attempts: u32,
}

fn one() -> u32 {
    1
}

impl CheckResult {
    pub fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            level: 0,
            group: String::new(),
            name: name.into(),
            status,
            detail: detail.into(),
            attachments: serde_json::Map::new(),
            duration_ms: 0,
            attempts: 1,
        }
    }

    pub fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, detail)
    }

    pub fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, detail)
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, detail)
    }

    pub fn with_attachment(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attachments.insert(key.to_string(), value);
        self
    }

    pub fn attachment(&self, key: &str) -> Option<&serde_json::Value> {
        self.attachments.get(key)
    }
}

/// Everything diagnostics produced for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub run_id: String,
    pub requested_level: DiagnosticsLevel,
    pub levels_executed: Vec<u8>,
    pub checks: Vec<CheckResult>,
    pub status: CheckStatus,
    pub generated_at: DateTime<Utc>,
}

impl EvidenceBundle {
    pub fn new(
        run_id: impl Into<String>,
        requested_level: DiagnosticsLevel,
        levels_executed: Vec<u8>,
        checks: Vec<CheckResult>,
    ) -> Self {
        let status = aggregate(&checks);
        Self {
            run_id: run_id.into(),
            requested_level,
            levels_executed,
            checks,
            status,
            generated_at: Utc::now(),
        }
    }

    /// True when every level up to `level` was executed.
    pub fn covers(&self, level: u8) -> bool {
        (0..=level).all(|l| self.levels_executed.contains(&l))
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn checks_at(&self, level: u8) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(move |c| c.level == level)
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }
}

/// FAIL if any check failed, else WARN if any warned, else PASS.
pub fn aggregate(checks: &[CheckResult]) -> CheckStatus {
    checks
        .iter()
        .fold(CheckStatus::Pass, |acc, c| acc.worst(c.status))
}
