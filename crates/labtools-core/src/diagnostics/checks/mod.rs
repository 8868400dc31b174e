//! The ordered registry of check groups, one or more per level.
//!
//! A group is a plain function over an immutable [`CheckContext`] and the
//! results of all lower levels. Groups never touch the run directly; the
//! engine records their results.

use std::collections::BTreeMap;

use regex::Regex;

use crate::domain::artifact::ArtifactRecord;
use crate::domain::evidence::CheckResult;
use crate::domain::level::DiagnosticsLevel;
use crate::manifest::{DatasetHandle, DatasetManifest, RecordedManifest};

use super::config::{DiagnosticsConfig, PiiPattern};
use super::governance::Ruleset;

pub mod audit;
pub mod governance;
pub mod integrity;
pub mod localization;
pub mod logging;
pub mod reconcile;
pub mod reproducibility;
pub mod safety;
pub mod scope;
pub mod structure;

/// Run identity as seen by checks.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run_id: String,
    pub project: String,
    pub environment: String,
    pub ruleset: String,
    pub code_version: String,
    pub artifacts: Vec<ArtifactRecord>,
}

/// Everything a check may read. Built once per diagnostics run.
#[derive(Debug)]
pub struct CheckContext {
    pub run: RunSnapshot,
    pub level: DiagnosticsLevel,
    pub datasets: Vec<DatasetHandle>,
    /// Current manifest entries, keyed by dataset name.
    pub manifests: BTreeMap<String, DatasetManifest>,
    /// Rounded checksums, keyed by dataset name.
    pub checksums: BTreeMap<String, String>,
    /// Baselines recorded by earlier runs, keyed by dataset name.
    pub baselines: BTreeMap<String, RecordedManifest>,
    pub config: DiagnosticsConfig,
    pub ruleset: Option<Ruleset>,
    pub pii: Vec<(PiiPattern, Regex)>,
}

impl CheckContext {
    pub fn dataset(&self, name: &str) -> Option<&DatasetHandle> {
        self.datasets.iter().find(|d| d.name == name)
    }
}

pub type CheckFn = fn(&CheckContext, &[CheckResult]) -> Vec<CheckResult>;

#[derive(Clone, Copy)]
pub struct CheckGroup {
    pub level: u8,
    pub name: &'static str,
    /// Safe to run again after a timeout or panic.
    pub idempotent: bool,
    pub run: CheckFn,
}

impl std::fmt::Debug for CheckGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckGroup")
            .field("level", &self.level)
            .field("name", &self.name)
            .field("idempotent", &self.idempotent)
            .finish()
    }
}

fn group(level: u8, name: &'static str, run: CheckFn) -> CheckGroup {
    CheckGroup {
        level,
        name,
        idempotent: true,
        run,
    }
}

/// Built-in groups in execution order.
pub fn standard_groups() -> Vec<CheckGroup> {
    vec![
        group(0, "logging", logging::run),
        group(1, "structure", structure::run),
        group(2, "scope", scope::run),
        group(3, "integrity", integrity::run),
        group(4, "localization", localization::partitions),
        group(4, "schema_drift", localization::schema_drift),
        group(5, "governance", governance::run),
        group(6, "reconcile", reconcile::run),
        group(7, "reproducibility", reproducibility::run),
        group(8, "pii", safety::pii),
        group(8, "distribution", safety::distribution),
        group(9, "timing", audit::timing),
        group(9, "evidence_package", audit::package),
    ]
}
