use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;
use crate::run_context::RunError;

use super::rules::PatternMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    UnmanagedSubprocess,
    ProtectedPathAccess,
    ThrowawayPattern,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViolationKind::UnmanagedSubprocess => "unmanaged subprocess",
            ViolationKind::ProtectedPathAccess => "protected path access",
            ViolationKind::ThrowawayPattern => "throwaway pattern",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("policy violation ({kind}): {detail}")]
pub struct PolicyViolation {
    pub kind: ViolationKind,
    pub detail: String,
    #[serde(default)]
    pub matches: Vec<PatternMatch>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnforcerError {
    #[error("an execution enforcer is already attached to run {run_id}")]
    AlreadyAttached { run_id: String },

    #[error(transparent)]
    Violation(#[from] PolicyViolation),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnforcerError {
    pub fn violation(&self) -> Option<&PolicyViolation> {
        match self {
            EnforcerError::Violation(v) => Some(v),
            _ => None,
        }
    }
}

pub type EnforcerResult<T> = std::result::Result<T, EnforcerError>;
