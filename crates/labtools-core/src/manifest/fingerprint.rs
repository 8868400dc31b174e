//! Order-independent content fingerprints.
//!
//! A fingerprint hashes the logical schema (column names and types, sorted by
//! name) and the multiset of rows. Each row is encoded as canonical JSON in
//! sorted-column order and the encodings are sorted before hashing, so neither
//! row order nor column order affects the result.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::digest::canonicalize;

use super::dataset::{ColumnSchema, Dataset};
use super::error::ManifestResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintOptions {
    /// Volatile columns left out of the hash, such as load timestamps.
    #[serde(default)]
    pub drop_columns: BTreeSet<String>,
    /// Round floats to this many decimals before hashing.
    #[serde(default)]
    pub round_places: Option<u32>,
}

impl FingerprintOptions {
    pub fn rounded(places: u32) -> Self {
        Self {
            round_places: Some(places),
            ..Self::default()
        }
    }

    pub fn dropping<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_columns.extend(columns.into_iter().map(Into::into));
        self
    }
}

/// Fingerprint with default options.
pub fn fingerprint(dataset: &Dataset) -> ManifestResult<String> {
    fingerprint_with(dataset, &FingerprintOptions::default())
}

pub fn fingerprint_with(dataset: &Dataset, options: &FingerprintOptions) -> ManifestResult<String> {
    let columns = hashed_columns(dataset, options);
    let mut hasher = Sha256::new();

    let header: Vec<Value> = columns
        .iter()
        .map(|c| Value::String(format!("{}:{}", c.name, c.data_type)))
        .collect();
    hasher.update(serde_json::to_vec(&header)?);

    for row in canonical_rows(dataset, &columns, options.round_places)? {
        hasher.update((row.len() as u64).to_le_bytes());
        hasher.update(row.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

fn hashed_columns<'a>(dataset: &'a Dataset, options: &FingerprintOptions) -> Vec<&'a ColumnSchema> {
    let mut columns: Vec<&ColumnSchema> = dataset
        .columns
        .iter()
        .filter(|c| !options.drop_columns.contains(&c.name))
        .collect();
    columns.sort_by(|a, b| a.name.cmp(&b.name));
    columns
}

/// Sorted canonical encodings of every row.
fn canonical_rows(
    dataset: &Dataset,
    columns: &[&ColumnSchema],
    places: Option<u32>,
) -> ManifestResult<Vec<String>> {
    let mut encoded = dataset
        .rows
        .iter()
        .map(|row| -> ManifestResult<String> {
            let cells: Vec<Value> = columns
                .iter()
                .map(|c| dataset.value(row, &c.name).clone())
                .collect();
            let canonical = canonicalize(&Value::Array(cells), places)?;
            Ok(serde_json::to_string(&canonical)?)
        })
        .collect::<ManifestResult<Vec<String>>>()?;
    encoded.sort_unstable();
    Ok(encoded)
}
