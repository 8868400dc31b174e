use crate::domain::error::ConfigError;

/// Errors raised by run lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("artifact already registered for run {run_id}: {path}")]
    DuplicateArtifact { run_id: String, path: String },

    #[error("run {0} is already closed")]
    AlreadyClosed(String),

    #[error("run {0} is corrupted; its audit log is no longer writable")]
    Corrupted(String),

    /// The audit sink rejected a write. The run is now corrupted.
    #[error("audit log write failed for run {run_id}: {source}")]
    LogWrite {
        run_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to flush run summary for {run_id}: {source}")]
    Flush {
        run_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid stage transition for run {run_id}: {from} -> {to}")]
    InvalidStageTransition {
        run_id: String,
        from: String,
        to: String,
    },

    #[error("run {0} has been dropped")]
    Detached(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type RunResult<T> = std::result::Result<T, RunError>;
