//! Persistence of per-dataset baselines across runs.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::entry::DatasetManifest;
use super::error::{ManifestError, ManifestResult};

/// The manifest entry last recorded for a dataset identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedManifest {
    pub identity: String,
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub entry: DatasetManifest,
    /// Rounded math-integrity checksum, when one was computed.
    #[serde(default)]
    pub checksum: Option<String>,
}

pub trait ManifestStore: Send + Sync {
    fn get(&self, identity: &str) -> ManifestResult<Option<RecordedManifest>>;
    fn put(&self, record: &RecordedManifest) -> ManifestResult<()>;
}

/// One JSON file per identity under `root`, written atomically.
#[derive(Debug, Clone)]
pub struct FsManifestStore {
    root: PathBuf,
}

impl FsManifestStore {
    pub fn new(root: impl AsRef<Path>) -> ManifestResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn record_path(&self, identity: &str) -> PathBuf {
        let safe: String = identity
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{safe}.manifest.json"))
    }
}

impl ManifestStore for FsManifestStore {
    fn get(&self, identity: &str) -> ManifestResult<Option<RecordedManifest>> {
        match fs::read(self.record_path(identity)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, record: &RecordedManifest) -> ManifestResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&serde_json::to_vec_pretty(record)?)?;
        tmp.persist(self.record_path(&record.identity))
            .map_err(|e| ManifestError::Io(e.error))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    records: Mutex<HashMap<String, RecordedManifest>>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ManifestStore for MemoryManifestStore {
    fn get(&self, identity: &str) -> ManifestResult<Option<RecordedManifest>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned())
    }

    fn put(&self, record: &RecordedManifest) -> ManifestResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.identity.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::dataset::{ColumnSchema, DataType, Dataset};
    use crate::manifest::entry::build_manifest;

    fn record(identity: &str) -> RecordedManifest {
        let mut ds = Dataset::new("t", vec![ColumnSchema::new("a", DataType::Integer)]);
        ds.push_row(serde_json::json!({"a": 1})).expect("row");
        RecordedManifest {
            identity: identity.to_string(),
            run_id: "run-1".to_string(),
            recorded_at: Utc::now(),
            entry: build_manifest(&ds).expect("manifest"),
            checksum: Some("abc".to_string()),
        }
    }

    #[test]
    fn test_fs_store_overwrites_and_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsManifestStore::new(dir.path()).expect("store");
        assert!(store.get("proj/t").expect("get").is_none());

        store.put(&record("proj/t")).expect("put");
        let mut newer = record("proj/t");
        newer.run_id = "run-2".to_string();
        store.put(&newer).expect("put newer");

        let loaded = store.get("proj/t").expect("get").expect("present");
        assert_eq!(loaded.run_id, "run-2");
        assert_eq!(loaded.checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryManifestStore::new();
        store.put(&record("x")).expect("put");
        assert_eq!(store.len(), 1);
        assert!(store.get("y").expect("get").is_none());
    }
}
