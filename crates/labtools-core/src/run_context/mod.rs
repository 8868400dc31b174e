//! Run identity, audit ledger and lifecycle.

pub mod cancel;
pub mod context;
pub mod environment;
pub mod error;
pub mod sink;

pub use cancel::CancelSignal;
pub use context::{
    AuditAppender, GateStage, RunContext, RunInfo, RunOptions, RunStatus, RunSummary,
};
pub use environment::{verify_run_environment, LabEnvironment};
pub use error::{RunError, RunResult};
pub use sink::{AuditSink, JsonlAuditSink, MemoryAuditSink};
