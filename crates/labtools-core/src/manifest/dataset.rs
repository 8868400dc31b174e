//! Tabular datasets handed to diagnostics.
//!
//! Rows are JSON objects keyed by column name, so physical column order never
//! matters. Datasets are shared read-only through [`DatasetHandle`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{ManifestError, ManifestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    Timestamp,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Text => "text",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Column whose values identify partitions, if any.
    #[serde(default)]
    pub partition_by: Option<String>,
}

pub type DatasetHandle = Arc<Dataset>;

impl Dataset {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
            partition_by: None,
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    pub fn partitioned_by(mut self, column: impl Into<String>) -> Self {
        self.partition_by = Some(column.into());
        self
    }

    pub fn push_row(&mut self, row: Value) -> ManifestResult<()> {
        match row {
            Value::Object(map) => {
                self.rows.push(map);
                Ok(())
            }
            other => Err(ManifestError::InvalidDataset {
                dataset: self.name.clone(),
                reason: format!("row must be a JSON object, got {other}"),
            }),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Value of `column` in `row`; missing keys read as null.
    pub fn value<'a>(&self, row: &'a Row, column: &str) -> &'a Value {
        row.get(column).unwrap_or(&Value::Null)
    }

    pub fn values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().map(move |row| self.value(row, column))
    }

    /// Structural checks: unique column names and a known partition column.
    pub fn validate(&self) -> ManifestResult<()> {
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ManifestError::InvalidDataset {
                    dataset: self.name.clone(),
                    reason: format!("duplicate column {}", column.name),
                });
            }
        }
        if let Some(partition) = &self.partition_by {
            if !self.has_column(partition) {
                return Err(ManifestError::InvalidDataset {
                    dataset: self.name.clone(),
                    reason: format!("partition column {partition} not in schema"),
                });
            }
        }
        Ok(())
    }

    pub fn into_handle(self) -> DatasetHandle {
        Arc::new(self)
    }

    /// Load a dataset from its JSON representation.
    pub fn load_json(path: &Path) -> ManifestResult<Self> {
        let bytes = std::fs::read(path)?;
        let dataset: Dataset = serde_json::from_slice(&bytes)?;
        dataset.validate()?;
        Ok(dataset)
    }
}

/// Stable text key for a cell, used for partitions and distinct counts.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dataset_json_shape() {
        let dataset: Dataset = serde_json::from_value(json!({
            "name": "sales",
            "columns": [
                {"name": "id", "type": "integer", "nullable": false},
                {"name": "region", "type": "text"}
            ],
            "rows": [{"id": 1, "region": "emea"}],
            "partition_by": "region"
        }))
        .expect("parse dataset");
        dataset.validate().expect("valid");
        assert_eq!(dataset.row_count(), 1);
        assert!(dataset.column("region").expect("region").nullable);
        assert!(!dataset.column("id").expect("id").nullable);
    }

    #[test]
    fn test_unknown_partition_column_rejected() {
        let dataset = Dataset::new("t", vec![ColumnSchema::new("a", DataType::Integer)])
            .partitioned_by("b");
        assert!(matches!(
            dataset.validate(),
            Err(ManifestError::InvalidDataset { .. })
        ));
    }

    #[test]
    fn test_missing_cell_reads_null() {
        let mut dataset = Dataset::new("t", vec![ColumnSchema::new("a", DataType::Integer)]);
        dataset.push_row(json!({})).expect("push");
        assert_eq!(dataset.values("a").next(), Some(&Value::Null));
        assert!(dataset.push_row(json!([1])).is_err());
    }
}
