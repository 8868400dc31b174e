//! Tunables for the diagnostics ladder.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::evidence::CheckStatus;

/// How a detected drift is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    Ignore,
    #[default]
    Warn,
    Fail,
}

impl DriftSeverity {
    pub fn status(self) -> CheckStatus {
        match self {
            DriftSeverity::Ignore => CheckStatus::Pass,
            DriftSeverity::Warn => CheckStatus::Warn,
            DriftSeverity::Fail => CheckStatus::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftPolicy {
    pub checksum: DriftSeverity,
    pub schema: DriftSeverity,
    pub partition: DriftSeverity,
    pub distribution: DriftSeverity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Metric {
    RowCount,
    Sum { column: String },
    Mean { column: String },
    DistinctCount { column: String },
}

impl Metric {
    pub fn label(&self) -> String {
        match self {
            Metric::RowCount => "row_count".to_string(),
            Metric::Sum { column } => format!("sum({column})"),
            Metric::Mean { column } => format!("mean({column})"),
            Metric::DistinctCount { column } => format!("distinct_count({column})"),
        }
    }
}

/// A headline metric recomputed two ways at level 6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub dataset: String,
    pub metric: Metric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiPattern {
    pub id: String,
    pub pattern: String,
    #[serde(default = "fail_severity")]
    pub severity: DriftSeverity,
}

fn fail_severity() -> DriftSeverity {
    DriftSeverity::Fail
}

impl PiiPattern {
    fn new(id: &str, pattern: &str, severity: DriftSeverity) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            severity,
        }
    }

    pub fn defaults() -> Vec<PiiPattern> {
        vec![
            Self::new(
                "email",
                r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
                DriftSeverity::Fail,
            ),
            Self::new("us_ssn", r"\b\d{3}-\d{2}-\d{4}\b", DriftSeverity::Fail),
            Self::new("phone", r"\b\d{3}[\s.-]\d{3}[\s.-]\d{4}\b", DriftSeverity::Warn),
            Self::new("card_number", r"\b(?:\d[ -]?){15,16}\b", DriftSeverity::Warn),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Decimal places used by the level-3 checksum.
    pub rounding_places: u32,
    pub check_timeout_ms: u64,
    /// Required datasets and, for each, its required columns.
    pub required: BTreeMap<String, Vec<String>>,
    /// Datasets allowed to be empty.
    pub allow_empty: BTreeSet<String>,
    /// Volatile columns excluded from fingerprints.
    pub drop_columns: BTreeSet<String>,
    pub drift: DriftPolicy,
    /// Relative row-count change that flags a partition at level 4.
    pub partition_delta_ratio: f64,
    /// Mean shift, in baseline standard deviations, that flags a column at level 8.
    pub distribution_sigma: f64,
    pub null_rate_delta: f64,
    /// Explicit level-6 reconciliations. Empty means row count and column
    /// sums for every dataset.
    pub reconciliations: Vec<Reconciliation>,
    pub reconcile_tolerance: f64,
    pub reconcile_chunk_rows: usize,
    pub pii_patterns: Vec<PiiPattern>,
    /// Where level 9 writes the evidence package.
    pub evidence_dir: Option<PathBuf>,
    /// Where dataset baselines are kept between runs.
    pub store_dir: Option<PathBuf>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rounding_places: 6,
            check_timeout_ms: 30_000,
            required: BTreeMap::new(),
            allow_empty: BTreeSet::new(),
            drop_columns: BTreeSet::new(),
            drift: DriftPolicy::default(),
            partition_delta_ratio: 0.10,
            distribution_sigma: 3.0,
            null_rate_delta: 0.05,
            reconciliations: Vec::new(),
            reconcile_tolerance: 1e-9,
            reconcile_chunk_rows: 1_000,
            pii_patterns: PiiPattern::defaults(),
            evidence_dir: None,
            store_dir: None,
        }
    }
}

impl DiagnosticsConfig {
    pub fn require(mut self, dataset: &str, columns: &[&str]) -> Self {
        self.required.insert(
            dataset.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn with_evidence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.evidence_dir = Some(dir.into());
        self
    }

    pub fn with_drift(mut self, drift: DriftPolicy) -> Self {
        self.drift = drift;
        self
    }
}
