//! LabTools Core Library
//!
//! Governed lab runs: a run identity with an append-only audit log, process
//! enforcement bound to that run, dataset manifests, the cumulative
//! diagnostics ladder, and the build report gate.

pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod enforcer;
pub mod git;
pub mod manifest;
pub mod metrics;
pub mod obs;
pub mod reporter;
pub mod run_context;
pub mod telemetry;

pub use config::{GovernanceConfig, RunSection, ValidationConfig, DEFAULT_CONFIG_FILE};

pub use domain::{
    ArtifactRecord, AuditEvent, AuditKind, CheckResult, CheckStatus, ConfigError, Decision,
    DiagnosticsLevel, DigestError, EvidenceBundle, LabError, OutputRef, Result, Tier, TierStatus,
    TierSummary, ValidationResult, ValidationStatus, ValidationSummary,
};

pub use run_context::{
    verify_run_environment, AuditAppender, AuditSink, CancelSignal, GateStage, JsonlAuditSink,
    LabEnvironment, MemoryAuditSink, RunContext, RunError, RunInfo, RunOptions, RunStatus,
    RunSummary,
};

pub use enforcer::{
    EnforcementPolicy, EnforcerError, EnforcerHandle, ExecutionEnforcer, InterceptedOp,
    PolicyViolation, SpawnRequest, Strictness, ThrowawayRule, ViolationKind,
};

pub use manifest::{
    build_manifest, diff, diff_manifests, fingerprint, ColumnSchema, DataType, Dataset,
    DatasetHandle, DriftReport, FsManifestStore, Manifest, ManifestDiff, ManifestStore,
    MemoryManifestStore,
};

pub use diagnostics::{DiagnosticsConfig, DiagnosticsEngine, EvidencePackage, Ruleset};

pub use reporter::{BuildReport, BuildReporter, ExitOutcome, ReportError, ReportPolicy};

pub use git::{capture_head_sha, resolve_code_version};
pub use metrics::METRICS;
pub use telemetry::init_tracing;
