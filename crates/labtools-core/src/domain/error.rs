//! Domain-level error taxonomy for LabTools.
//!
//! Configuration problems are fatal before a run opens. Each subsystem owns
//! its own error enum; [`LabError`] folds them together for callers that
//! drive the whole pipeline.

use crate::diagnostics::DiagnosticsError;
use crate::enforcer::EnforcerError;
use crate::manifest::ManifestError;
use crate::reporter::ReportError;
use crate::run_context::RunError;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid diagnostics level: {0} (expected 0..=9)")]
    InvalidLevel(i64),

    #[error("unknown ruleset: {0}")]
    UnknownRuleset(String),

    #[error("unknown environment: {0} (expected test, dev, stage, lab, audit or client)")]
    UnknownEnvironment(String),

    #[error("invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while computing canonical digests.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("NaN/Infinity not permitted in canonical JSON")]
    NonFiniteNumber,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for callers driving a complete governed run.
#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Enforcer(#[from] EnforcerError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Diagnostics(#[from] DiagnosticsError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for LabTools pipeline operations.
pub type Result<T> = std::result::Result<T, LabError>;
