//! Dataset manifests, content fingerprints and drift detection.

pub mod dataset;
pub mod drift;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod store;

pub use dataset::{value_key, ColumnSchema, DataType, Dataset, DatasetHandle, Row};
pub use drift::{diff, diff_manifests, DriftReport, ManifestDiff, TypeChange};
pub use entry::{
    build_manifest, build_manifest_with, column_stats, ColumnStats, DatasetManifest, Manifest,
    NumericStats, PartitionBounds, PartitionStats,
};
pub use error::{ManifestError, ManifestResult};
pub use fingerprint::{fingerprint, fingerprint_with, FingerprintOptions};
pub use store::{FsManifestStore, ManifestStore, MemoryManifestStore, RecordedManifest};
