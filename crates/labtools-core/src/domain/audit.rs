//! Audit events recorded against a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SubprocessAttempt,
    FileAccess,
    PolicyViolation,
    Checkpoint,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::SubprocessAttempt => "subprocess_attempt",
            AuditKind::FileAccess => "file_access",
            AuditKind::PolicyViolation => "policy_violation",
            AuditKind::Checkpoint => "checkpoint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Blocked,
}

/// A single append-only audit entry. `seq` is assigned by the run at append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(default)]
    pub seq: u64,
    pub kind: AuditKind,
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, decision: Decision, payload: serde_json::Value) -> Self {
        Self {
            seq: 0,
            kind,
            timestamp: Utc::now(),
            decision,
            payload,
        }
    }

    /// A checkpoint marking pipeline progress, e.g. a stage transition.
    pub fn checkpoint(label: &str, details: serde_json::Value) -> Self {
        Self::new(
            AuditKind::Checkpoint,
            Decision::Allowed,
            serde_json::json!({ "label": label, "details": details }),
        )
    }

    pub fn label(&self) -> Option<&str> {
        self.payload.get("label").and_then(|v| v.as_str())
    }

    pub fn is_blocked(&self) -> bool {
        self.decision == Decision::Blocked
    }
}
