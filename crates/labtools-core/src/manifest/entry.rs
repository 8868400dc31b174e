//! Per-dataset manifest entries.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dataset::{value_key, ColumnSchema, Dataset, DatasetHandle};
use super::error::ManifestResult;
use super::fingerprint::{fingerprint_with, FingerprintOptions};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub null_count: u64,
    pub distinct_count: u64,
    #[serde(default)]
    pub numeric: Option<NumericStats>,
}

impl ColumnStats {
    pub fn null_rate(&self, row_count: u64) -> f64 {
        if row_count == 0 {
            0.0
        } else {
            self.null_count as f64 / row_count as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub rows: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionBounds {
    pub column: String,
    pub min: Option<String>,
    pub max: Option<String>,
    pub partitions: BTreeMap<String, PartitionStats>,
}

/// Immutable description of one dataset at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub name: String,
    /// Columns sorted by name.
    pub schema: Vec<ColumnSchema>,
    pub row_count: u64,
    /// Size of the canonical JSON encoding of the rows.
    pub size_bytes: u64,
    pub fingerprint: String,
    #[serde(default)]
    pub partition_bounds: Option<PartitionBounds>,
    #[serde(default)]
    pub column_stats: BTreeMap<String, ColumnStats>,
}

impl DatasetManifest {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.schema.iter().find(|c| c.name == name)
    }
}

/// Ordered mapping of dataset name to manifest entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub datasets: BTreeMap<String, DatasetManifest>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_datasets(datasets: &[DatasetHandle], options: &FingerprintOptions) -> ManifestResult<Self> {
        let mut manifest = Self::new();
        for dataset in datasets {
            manifest.insert(build_manifest_with(dataset, options)?);
        }
        Ok(manifest)
    }

    pub fn insert(&mut self, entry: DatasetManifest) {
        self.datasets.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&DatasetManifest> {
        self.datasets.get(name)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

pub fn build_manifest(dataset: &Dataset) -> ManifestResult<DatasetManifest> {
    build_manifest_with(dataset, &FingerprintOptions::default())
}

pub fn build_manifest_with(dataset: &Dataset, options: &FingerprintOptions) -> ManifestResult<DatasetManifest> {
    dataset.validate()?;
    let mut schema = dataset.columns.clone();
    schema.sort_by(|a, b| a.name.cmp(&b.name));

    let mut size_bytes = 0u64;
    let mut row_sizes = Vec::with_capacity(dataset.rows.len());
    for row in &dataset.rows {
        let bytes = serde_json::to_vec(row)?.len() as u64;
        size_bytes += bytes;
        row_sizes.push(bytes);
    }

    Ok(DatasetManifest {
        name: dataset.name.clone(),
        schema,
        row_count: dataset.row_count() as u64,
        size_bytes,
        fingerprint: fingerprint_with(dataset, options)?,
        partition_bounds: partition_bounds(dataset, &row_sizes),
        column_stats: dataset
            .columns
            .iter()
            .map(|c| (c.name.clone(), column_stats(dataset, &c.name)))
            .collect(),
    })
}

fn partition_bounds(dataset: &Dataset, row_sizes: &[u64]) -> Option<PartitionBounds> {
    let column = dataset.partition_by.as_ref()?;
    let mut partitions: BTreeMap<String, PartitionStats> = BTreeMap::new();
    for (row, bytes) in dataset.rows.iter().zip(row_sizes) {
        let stats = partitions
            .entry(value_key(dataset.value(row, column)))
            .or_default();
        stats.rows += 1;
        stats.bytes += bytes;
    }
    Some(PartitionBounds {
        column: column.clone(),
        min: partitions.keys().next().cloned(),
        max: partitions.keys().next_back().cloned(),
        partitions,
    })
}

pub fn column_stats(dataset: &Dataset, column: &str) -> ColumnStats {
    let mut null_count = 0u64;
    let mut distinct = HashSet::new();
    let mut numbers = Vec::new();
    for value in dataset.values(column) {
        match value {
            Value::Null => null_count += 1,
            other => {
                distinct.insert(value_key(other));
                if let Some(n) = other.as_f64() {
                    numbers.push(n);
                }
            }
        }
    }
    let is_numeric = dataset.column(column).is_some_and(|c| c.data_type.is_numeric());
    ColumnStats {
        null_count,
        distinct_count: distinct.len() as u64,
        numeric: if is_numeric { numeric_stats(&numbers) } else { None },
    }
}

fn numeric_stats(values: &[f64]) -> Option<NumericStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(NumericStats {
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean,
        std_dev: variance.sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::dataset::DataType;
    use serde_json::json;

    fn regional() -> Dataset {
        let mut ds = Dataset::new(
            "orders",
            vec![
                ColumnSchema::new("region", DataType::Text),
                ColumnSchema::new("amount", DataType::Float),
            ],
        )
        .partitioned_by("region");
        for (region, amount) in [("emea", 10.0), ("emea", 20.0), ("apac", 30.0)] {
            ds.push_row(json!({"region": region, "amount": amount})).expect("row");
        }
        ds.push_row(json!({"region": "apac", "amount": null})).expect("row");
        ds
    }

    #[test]
    fn test_partition_bounds() {
        let entry = build_manifest(&regional()).expect("manifest");
        let bounds = entry.partition_bounds.expect("partitioned");
        assert_eq!(bounds.min.as_deref(), Some("apac"));
        assert_eq!(bounds.max.as_deref(), Some("emea"));
        assert_eq!(bounds.partitions["emea"].rows, 2);
        assert_eq!(bounds.partitions["apac"].rows, 2);
        let total: u64 = bounds.partitions.values().map(|p| p.bytes).sum();
        assert_eq!(total, entry.size_bytes);
    }

    #[test]
    fn test_column_stats() {
        let entry = build_manifest(&regional()).expect("manifest");
        let amount = &entry.column_stats["amount"];
        assert_eq!(amount.null_count, 1);
        assert_eq!(amount.distinct_count, 3);
        let numeric = amount.numeric.expect("numeric stats");
        assert_eq!(numeric.min, 10.0);
        assert_eq!(numeric.max, 30.0);
        assert!((numeric.mean - 20.0).abs() < 1e-9);
        assert!((amount.null_rate(entry.row_count) - 0.25).abs() < 1e-9);
        assert!(entry.column_stats["region"].numeric.is_none());
    }

    #[test]
    fn test_schema_is_sorted() {
        let entry = build_manifest(&regional()).expect("manifest");
        let names: Vec<&str> = entry.schema.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["amount", "region"]);
    }
}
