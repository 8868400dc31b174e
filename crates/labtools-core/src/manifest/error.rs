use crate::domain::error::DigestError;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid dataset {dataset}: {reason}")]
    InvalidDataset { dataset: String, reason: String },

    #[error("manifest store error: {0}")]
    Store(String),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ManifestResult<T> = std::result::Result<T, ManifestError>;
