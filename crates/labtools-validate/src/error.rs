use std::path::PathBuf;

use labtools_core::run_context::RunError;

#[derive(Debug, thiserror::Error)]
pub enum ValidationRunError {
    #[error("validation root {0} is not a directory")]
    MissingRoot(PathBuf),

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ValidationRunResult<T> = std::result::Result<T, ValidationRunError>;
