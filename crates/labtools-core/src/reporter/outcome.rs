//! Process exit codes for the collaborator layer.

use serde::{Deserialize, Serialize};

use crate::domain::error::LabError;
use crate::enforcer::EnforcerError;

use super::ReportError;

/// Exit code for errors that are not a governance outcome.
pub const EXIT_ERROR: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    Success,
    PolicyViolation,
    ValidationFailure,
    GateNotReady,
}

impl ExitOutcome {
    pub fn code(self) -> i32 {
        match self {
            ExitOutcome::Success => 0,
            ExitOutcome::PolicyViolation => 2,
            ExitOutcome::ValidationFailure => 3,
            ExitOutcome::GateNotReady => 4,
        }
    }

    /// Governance outcome carried by an error, if any.
    pub fn from_error(err: &LabError) -> Option<ExitOutcome> {
        match err {
            LabError::Enforcer(EnforcerError::Violation(_)) => Some(ExitOutcome::PolicyViolation),
            LabError::Report(ReportError::GateNotReady { .. })
            | LabError::Report(ReportError::IncompleteEvidence { .. })
            | LabError::Report(ReportError::AlreadyRejected { .. }) => Some(ExitOutcome::GateNotReady),
            _ => None,
        }
    }

    pub fn code_for_error(err: &LabError) -> i32 {
        Self::from_error(err).map(Self::code).unwrap_or(EXIT_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ConfigError;

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            ExitOutcome::Success.code(),
            ExitOutcome::PolicyViolation.code(),
            ExitOutcome::ValidationFailure.code(),
            ExitOutcome::GateNotReady.code(),
            EXIT_ERROR,
        ];
        let mut unique = codes.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_error_mapping() {
        let gate: LabError = ReportError::GateNotReady {
            reasons: vec!["evidence status is FAIL".to_string()],
        }
        .into();
        assert_eq!(ExitOutcome::code_for_error(&gate), 4);

        let config: LabError = ConfigError::InvalidLevel(12).into();
        assert_eq!(ExitOutcome::code_for_error(&config), EXIT_ERROR);
    }
}
