use crate::domain::error::{ConfigError, DigestError};
use crate::manifest::ManifestError;
use crate::run_context::RunError;

#[derive(Debug, thiserror::Error)]
pub enum DiagnosticsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("evidence package error: {0}")]
    Evidence(#[from] DigestError),
}

pub type DiagnosticsResult<T> = std::result::Result<T, DiagnosticsError>;
