//! The cumulative diagnostics ladder run end to end against a live run.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use labtools_core::diagnostics::engine::EVIDENCE_PACKAGE_FILE;
use labtools_core::diagnostics::{DiagnosticsConfig, DiagnosticsEngine, DiagnosticsError, EvidencePackage};
use labtools_core::domain::CheckStatus;
use labtools_core::manifest::{ColumnSchema, DataType, Dataset, DatasetHandle, MemoryManifestStore};
use labtools_core::run_context::{GateStage, MemoryAuditSink, RunContext, RunOptions};
use labtools_core::ConfigError;

fn open() -> RunContext {
    RunContext::open(
        "churn-model",
        "test",
        "default",
        RunOptions::default()
            .with_sink(Arc::new(MemoryAuditSink::new()))
            .without_env_export()
            .with_code_version("0123abcd"),
    )
    .expect("open run")
}

fn sales(rows: usize, scale: f64) -> DatasetHandle {
    let mut ds = Dataset::new(
        "sales",
        vec![
            ColumnSchema::new("id", DataType::Integer).required(),
            ColumnSchema::new("amount", DataType::Float),
            ColumnSchema::new("region", DataType::Text),
        ],
    );
    for i in 0..rows {
        ds.push_row(json!({
            "id": i,
            "amount": (i % 17) as f64 * scale,
            "region": (["emea", "apac", "amer"][i % 3]),
        }))
        .expect("row");
    }
    ds.into_handle()
}

fn engine(store: Arc<MemoryManifestStore>) -> DiagnosticsEngine {
    DiagnosticsEngine::new(DiagnosticsConfig::default(), store)
}

// -------------------------------------------------------------------------
// levels
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_level_two_echoes_scope() {
    let run = open();
    let bundle = engine(Arc::new(MemoryManifestStore::new()))
        .run(&run, 2, &[sales(100, 1.0)])
        .await
        .expect("diagnostics");

    assert_eq!(bundle.levels_executed, vec![0, 1, 2]);
    assert!(bundle.covers(2));
    assert!(!bundle.covers(3));
    assert!(bundle.checks_at(1).all(|c| c.status == CheckStatus::Pass));

    let scope = bundle.check("scope.sales").expect("scope check");
    assert_eq!(scope.status, CheckStatus::Pass);
    assert_eq!(scope.level, 2);
    assert_eq!(scope.group, "scope");
    assert_eq!(scope.attachments["coverage"]["row_count"], 100);
    assert_eq!(bundle.status, CheckStatus::Pass);

    assert_eq!(run.stage(), GateStage::DiagnosticsRun);
    let levels: Vec<_> = run
        .audit_log()
        .into_iter()
        .filter(|e| e.label() == Some("diagnostics.level"))
        .collect();
    assert_eq!(levels.len(), 3);
}

#[tokio::test]
async fn test_higher_level_is_superset_of_lower() {
    let mut previous: BTreeSet<String> = BTreeSet::new();
    for level in 0u8..=9 {
        let run = open();
        let bundle = engine(Arc::new(MemoryManifestStore::new()))
            .run(&run, level, &[sales(30, 1.0)])
            .await
            .expect("diagnostics");
        let names: BTreeSet<String> = bundle.checks.iter().map(|c| c.name.clone()).collect();
        assert!(
            previous.is_subset(&names),
            "level {level} dropped {:?}",
            previous.difference(&names).collect::<Vec<_>>()
        );
        assert!(bundle.checks.iter().all(|c| c.level <= level));
        assert_eq!(bundle.levels_executed, (0..=level).collect::<Vec<u8>>());
        previous = names;
    }
}

#[tokio::test]
async fn test_out_of_range_level_rejected() {
    let run = open();
    match engine(Arc::new(MemoryManifestStore::new()))
        .run(&run, 10, &[sales(5, 1.0)])
        .await
    {
        Err(DiagnosticsError::Config(ConfigError::InvalidLevel(10))) => {}
        other => panic!("expected InvalidLevel, got {:?}", other.map(|b| b.status)),
    }
    assert_eq!(run.audit_len(), 0);
    assert_eq!(run.stage(), GateStage::Open);
}

#[tokio::test]
async fn test_closed_run_rejected() {
    let run = open();
    run.finalize().expect("finalize");
    assert!(engine(Arc::new(MemoryManifestStore::new()))
        .run(&run, 1, &[sales(5, 1.0)])
        .await
        .is_err());
}

// -------------------------------------------------------------------------
// baselines and evidence
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_second_run_flags_checksum_drift() {
    let store = Arc::new(MemoryManifestStore::new());

    let first = open();
    let bundle = engine(Arc::clone(&store))
        .run(&first, 3, &[sales(50, 1.0)])
        .await
        .expect("first run");
    assert_eq!(
        bundle.check("integrity.checksum.sales").expect("checksum").status,
        CheckStatus::Pass
    );
    assert_eq!(store.len(), 1);
    first.finalize().expect("finalize");

    let same = open();
    let bundle = engine(Arc::clone(&store))
        .run(&same, 3, &[sales(50, 1.0)])
        .await
        .expect("unchanged run");
    let checksum = bundle.check("integrity.checksum.sales").expect("checksum");
    assert_eq!(checksum.status, CheckStatus::Pass);
    assert!(checksum.detail.contains("matches"));

    let drifted = open();
    let bundle = engine(Arc::clone(&store))
        .run(&drifted, 3, &[sales(50, 1.5)])
        .await
        .expect("drifted run");
    let checksum = bundle.check("integrity.checksum.sales").expect("checksum");
    assert_eq!(checksum.status, CheckStatus::Warn);
    assert!(checksum.detail.contains(same.run_id()));
}

#[tokio::test]
async fn test_level_nine_writes_replayable_package() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = open();
    let config = DiagnosticsConfig::default().with_evidence_dir(dir.path());
    let bundle = DiagnosticsEngine::new(config, Arc::new(MemoryManifestStore::new()))
        .run(&run, 9, &[sales(40, 1.0)])
        .await
        .expect("diagnostics");
    assert!(bundle.covers(9));

    let path = dir.path().join(run.run_id()).join(EVIDENCE_PACKAGE_FILE);
    let package = EvidencePackage::read(&path).expect("package on disk");
    assert_eq!(package.run_id, run.run_id());
    assert_eq!(package.requested_level, 9);
    assert!(package.replay().expect("replay").verified());
    assert!(package.checks.iter().all(|c| c.level < 9));
    assert!(package.inputs.contains_key("sales"));

    let artifacts = run.artifacts();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].step, "diagnostics.evidence_package");
}
