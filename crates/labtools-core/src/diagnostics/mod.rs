//! Level-based diagnostics producing an [`EvidenceBundle`](crate::domain::EvidenceBundle).

pub mod checks;
pub mod config;
pub mod engine;
pub mod error;
pub mod governance;
pub mod package;

pub use checks::{standard_groups, CheckContext, CheckFn, CheckGroup, RunSnapshot};
pub use config::{DiagnosticsConfig, DriftPolicy, DriftSeverity, Metric, PiiPattern, Reconciliation};
pub use engine::DiagnosticsEngine;
pub use error::{DiagnosticsError, DiagnosticsResult};
pub use governance::{GovernanceRule, RuleCheck, RuleEvaluation, RuleOutcome, Ruleset};
pub use package::{EvidencePackage, ReplayOutcome};
