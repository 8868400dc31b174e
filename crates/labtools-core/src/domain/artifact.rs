//! Artifacts produced by a run.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::digest::sha256_file;
use crate::domain::error::DigestError;

/// A file produced by the run, identified by path and content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: String,
    pub fingerprint: String,
    pub size_bytes: u64,
    /// Pipeline step that produced the artifact.
    pub step: String,
    pub recorded_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn new(path: impl Into<String>, fingerprint: impl Into<String>, size_bytes: u64, step: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fingerprint: fingerprint.into(),
            size_bytes,
            step: step.into(),
            recorded_at: Utc::now(),
        }
    }

    /// Fingerprint an existing file on disk.
    pub fn from_file(path: &Path, step: &str) -> Result<Self, DigestError> {
        let (fingerprint, size_bytes) = sha256_file(path)?;
        Ok(Self::new(path.display().to_string(), fingerprint, size_bytes, step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file_records_size_and_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.csv");
        std::fs::write(&path, "a,b\n1,2\n").expect("write");

        let record = ArtifactRecord::from_file(&path, "export").expect("record");
        assert_eq!(record.size_bytes, 8);
        assert_eq!(record.step, "export");
        assert_eq!(record.fingerprint.len(), 64);
        assert!(record.path.ends_with("model.csv"));
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let err = ArtifactRecord::from_file(Path::new("/nonexistent/lab/file"), "x")
            .expect_err("missing file");
        assert!(matches!(err, DigestError::Io(_)));
    }
}
