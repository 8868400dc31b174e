//! Schema and content drift between manifests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::dataset::DataType;
use super::entry::{DatasetManifest, Manifest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeChange {
    pub column: String,
    pub from: DataType,
    pub to: DataType,
}

/// Differences between a baseline entry and a current entry of one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub dataset: String,
    pub added_columns: Vec<String>,
    pub removed_columns: Vec<String>,
    pub type_changes: Vec<TypeChange>,
    pub nullability_changes: Vec<String>,
    pub row_count_delta: i64,
    pub size_bytes_delta: i64,
    pub fingerprint_changed: bool,
}

impl DriftReport {
    pub fn has_schema_drift(&self) -> bool {
        !self.added_columns.is_empty()
            || !self.removed_columns.is_empty()
            || !self.type_changes.is_empty()
            || !self.nullability_changes.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        !self.has_schema_drift() && !self.fingerprint_changed && self.row_count_delta == 0
    }
}

/// Compare `current` against `baseline`.
pub fn diff(baseline: &DatasetManifest, current: &DatasetManifest) -> DriftReport {
    let before: BTreeMap<&str, _> = baseline.schema.iter().map(|c| (c.name.as_str(), c)).collect();
    let after: BTreeMap<&str, _> = current.schema.iter().map(|c| (c.name.as_str(), c)).collect();

    let added_columns = after
        .keys()
        .filter(|name| !before.contains_key(*name))
        .map(|name| name.to_string())
        .collect();
    let removed_columns = before
        .keys()
        .filter(|name| !after.contains_key(*name))
        .map(|name| name.to_string())
        .collect();

    let mut type_changes = Vec::new();
    let mut nullability_changes = Vec::new();
    for (name, old) in &before {
        if let Some(new) = after.get(name) {
            if old.data_type != new.data_type {
                type_changes.push(TypeChange {
                    column: name.to_string(),
                    from: old.data_type,
                    to: new.data_type,
                });
            }
            if old.nullable != new.nullable {
                nullability_changes.push(name.to_string());
            }
        }
    }

    DriftReport {
        dataset: current.name.clone(),
        added_columns,
        removed_columns,
        type_changes,
        nullability_changes,
        row_count_delta: current.row_count as i64 - baseline.row_count as i64,
        size_bytes_delta: current.size_bytes as i64 - baseline.size_bytes as i64,
        fingerprint_changed: baseline.fingerprint != current.fingerprint,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDiff {
    pub added_datasets: Vec<String>,
    pub removed_datasets: Vec<String>,
    /// Drift for every dataset present on both sides, clean or not.
    pub drifts: BTreeMap<String, DriftReport>,
}

impl ManifestDiff {
    pub fn has_drift(&self) -> bool {
        !self.added_datasets.is_empty()
            || !self.removed_datasets.is_empty()
            || self.drifts.values().any(|d| !d.is_clean())
    }
}

pub fn diff_manifests(baseline: &Manifest, current: &Manifest) -> ManifestDiff {
    let mut out = ManifestDiff::default();
    for (name, entry) in &current.datasets {
        match baseline.get(name) {
            Some(old) => {
                out.drifts.insert(name.clone(), diff(old, entry));
            }
            None => out.added_datasets.push(name.clone()),
        }
    }
    out.removed_datasets = baseline
        .datasets
        .keys()
        .filter(|name| current.get(name).is_none())
        .cloned()
        .collect();
    out
}
