//! Manifests and drift: fingerprints ignore physical ordering, diffs report
//! logical change only.

use serde_json::{json, Value};

use labtools_core::manifest::{
    build_manifest, build_manifest_with, diff, diff_manifests, fingerprint, fingerprint_with,
    ColumnSchema, DataType, Dataset, FingerprintOptions, FsManifestStore, Manifest, ManifestStore,
    RecordedManifest,
};

fn orders(rows: &[Value], extra_column: Option<&str>) -> Dataset {
    let mut columns = vec![
        ColumnSchema::new("order_id", DataType::Integer).required(),
        ColumnSchema::new("amount", DataType::Float),
        ColumnSchema::new("region", DataType::Text),
    ];
    if let Some(name) = extra_column {
        columns.push(ColumnSchema::new(name, DataType::Text));
    }
    let mut ds = Dataset::new("orders", columns);
    for row in rows {
        ds.push_row(row.clone()).expect("row");
    }
    ds
}

fn sample_rows() -> Vec<Value> {
    (0..20)
        .map(|i| {
            json!({
                "order_id": i,
                "amount": (i as f64) * 1.25,
                "region": if i % 2 == 0 { "emea" } else { "apac" },
            })
        })
        .collect()
}

// -------------------------------------------------------------------------
// drift
// -------------------------------------------------------------------------

#[test]
fn test_added_nullable_column_is_reported() {
    let rows = sample_rows();
    let baseline = build_manifest(&orders(&rows, None)).expect("baseline");
    let current = build_manifest(&orders(&rows, Some("channel"))).expect("current");

    let report = diff(&baseline, &current);
    assert_eq!(report.added_columns, vec!["channel".to_string()]);
    assert!(report.removed_columns.is_empty());
    assert!(report.type_changes.is_empty());
    assert!(report.fingerprint_changed);
    assert_eq!(report.row_count_delta, 0);
}

#[test]
fn test_type_and_nullability_changes() {
    let rows = sample_rows();
    let baseline = build_manifest(&orders(&rows, None)).expect("baseline");

    let mut changed = orders(&rows, None);
    changed.columns[0] = ColumnSchema::new("order_id", DataType::Text);
    let current = build_manifest(&changed).expect("current");

    let report = diff(&baseline, &current);
    assert_eq!(report.type_changes.len(), 1);
    assert_eq!(report.type_changes[0].column, "order_id");
    assert_eq!(report.type_changes[0].from, DataType::Integer);
    assert_eq!(report.type_changes[0].to, DataType::Text);
    assert_eq!(report.nullability_changes, vec!["order_id".to_string()]);
}

#[test]
fn test_row_count_delta_and_removed_dataset() {
    let rows = sample_rows();
    let mut before = Manifest::new();
    before.insert(build_manifest(&orders(&rows, None)).expect("orders"));
    let mut refunds = orders(&rows[..3], None);
    refunds.name = "refunds".to_string();
    before.insert(build_manifest(&refunds).expect("refunds"));

    let mut after = Manifest::new();
    after.insert(build_manifest(&orders(&rows[..15], None)).expect("orders"));

    let result = diff_manifests(&before, &after);
    assert_eq!(result.removed_datasets, vec!["refunds".to_string()]);
    assert!(result.added_datasets.is_empty());
    assert_eq!(result.drifts["orders"].row_count_delta, -5);
    assert!(result.drifts["orders"].size_bytes_delta < 0);
    assert!(result.has_drift());
}

// -------------------------------------------------------------------------
// fingerprints
// -------------------------------------------------------------------------

#[test]
fn test_fingerprint_ignores_row_and_column_order() {
    let rows = sample_rows();
    let original = orders(&rows, None);

    for rotation in [1usize, 7, 13] {
        let mut permuted_rows = rows.clone();
        permuted_rows.rotate_left(rotation);
        permuted_rows.reverse();
        let mut permuted = orders(&permuted_rows, None);
        permuted.columns.rotate_left(rotation % 3);

        assert_eq!(
            fingerprint(&original).expect("original"),
            fingerprint(&permuted).expect("permuted"),
            "rotation {rotation}"
        );
        assert!(diff(
            &build_manifest(&original).expect("a"),
            &build_manifest(&permuted).expect("b")
        )
        .is_clean());
    }
}

#[test]
fn test_fingerprint_changes_with_content() {
    let rows = sample_rows();
    let mut edited = rows.clone();
    edited[4]["amount"] = json!(999.0);
    assert_ne!(
        fingerprint(&orders(&rows, None)).expect("a"),
        fingerprint(&orders(&edited, None)).expect("b")
    );
}

#[test]
fn test_dropped_and_rounded_columns_stabilize_fingerprint() {
    let rows = sample_rows();
    let mut noisy = rows.clone();
    for (i, row) in noisy.iter_mut().enumerate() {
        let amount = row["amount"].as_f64().expect("amount");
        row["amount"] = json!(amount + 1e-9);
        row["loaded_at"] = json!(format!("2026-10-19T00:00:{:02}Z", i));
    }
    let stamped = |rows: &[Value]| {
        let mut ds = orders(rows, None);
        ds.columns.push(ColumnSchema::new("loaded_at", DataType::Timestamp));
        ds
    };

    let options = FingerprintOptions::rounded(6).dropping(["loaded_at"]);
    let clean = {
        let mut rows = rows.clone();
        for row in rows.iter_mut() {
            row["loaded_at"] = json!("2026-01-01T00:00:00Z");
        }
        stamped(&rows)
    };
    assert_eq!(
        fingerprint_with(&clean, &options).expect("clean"),
        fingerprint_with(&stamped(&noisy), &options).expect("noisy")
    );
    assert_ne!(
        fingerprint(&clean).expect("clean raw"),
        fingerprint(&stamped(&noisy)).expect("noisy raw")
    );
}

#[test]
fn test_partition_bounds_and_column_stats() {
    let ds = orders(&sample_rows(), None).partitioned_by("region");
    let entry = build_manifest_with(&ds, &FingerprintOptions::default()).expect("manifest");

    let bounds = entry.partition_bounds.expect("partitioned");
    assert_eq!(bounds.column, "region");
    assert_eq!(bounds.min.as_deref(), Some("apac"));
    assert_eq!(bounds.max.as_deref(), Some("emea"));
    assert_eq!(bounds.partitions["emea"].rows, 10);

    let amount = &entry.column_stats["amount"];
    assert_eq!(amount.null_count, 0);
    let numeric = amount.numeric.expect("numeric stats");
    assert_eq!(numeric.min, 0.0);
    assert_eq!(numeric.max, 19.0 * 1.25);
}

// -------------------------------------------------------------------------
// store
// -------------------------------------------------------------------------

#[test]
fn test_fs_store_keeps_latest_baseline_per_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsManifestStore::new(dir.path().join("baselines")).expect("store");
    let entry = build_manifest(&orders(&sample_rows(), None)).expect("manifest");

    for run in ["run-a", "run-b"] {
        store
            .put(&RecordedManifest {
                identity: "churn-model.orders".to_string(),
                run_id: run.to_string(),
                recorded_at: chrono::Utc::now(),
                entry: entry.clone(),
                checksum: None,
            })
            .expect("put");
    }

    let loaded = store
        .get("churn-model.orders")
        .expect("get")
        .expect("recorded");
    assert_eq!(loaded.run_id, "run-b");
    assert_eq!(loaded.entry, entry);
    assert!(store.get("churn-model.refunds").expect("get").is_none());
}
