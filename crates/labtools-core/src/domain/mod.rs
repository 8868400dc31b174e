//! Domain types shared across the LabTools pipeline.

pub mod artifact;
pub mod audit;
pub mod digest;
pub mod error;
pub mod evidence;
pub mod level;
pub mod validation;

pub use artifact::ArtifactRecord;
pub use audit::{AuditEvent, AuditKind, Decision};
pub use error::{ConfigError, DigestError, LabError, Result};
pub use evidence::{CheckResult, CheckStatus, EvidenceBundle};
pub use level::DiagnosticsLevel;
pub use validation::{
    OutputRef, Tier, TierStatus, TierSummary, ValidationResult, ValidationStatus,
    ValidationSummary,
};
