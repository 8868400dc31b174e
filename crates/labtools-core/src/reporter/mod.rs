//! Build reports and the approval gate.

pub mod outcome;
pub mod render;
pub mod report;

pub use outcome::ExitOutcome;
pub use render::{render_markdown, write_report, REPORT_JSON, REPORT_MARKDOWN};
pub use report::{
    Approval, BuildReport, BuildReporter, Rejection, ReportPolicy, ReportRunMetadata,
};

use crate::domain::error::DigestError;
use crate::run_context::RunError;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("incomplete evidence: level {required} required, executed levels {executed:?}")]
    IncompleteEvidence { required: u8, executed: Vec<u8> },

    #[error("gate not ready: {}", reasons.join("; "))]
    GateNotReady { reasons: Vec<String> },

    #[error("report {report_id} is already approved")]
    AlreadyApproved { report_id: String },

    #[error("report {report_id} was rejected")]
    AlreadyRejected { report_id: String },

    #[error("evidence belongs to run {evidence_run}, not {run_id}")]
    RunMismatch { run_id: String, evidence_run: String },

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("report digest failed: {0}")]
    Digest(#[from] DigestError),
}

pub type ReportResult<T> = std::result::Result<T, ReportError>;
