//! Executes check groups level by level against a run.
//!
//! Levels run in ascending order. Groups within a level run concurrently on
//! the blocking pool, each under a timeout; idempotent groups get one retry.
//! Baselines and evidence packages are persisted only after every group has
//! joined.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use regex::Regex;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::artifact::ArtifactRecord;
use crate::domain::audit::AuditEvent;
use crate::domain::error::ConfigError;
use crate::domain::evidence::{aggregate, CheckResult, EvidenceBundle};
use crate::domain::level::DiagnosticsLevel;
use crate::manifest::{
    build_manifest_with, fingerprint_with, DatasetHandle, FingerprintOptions, ManifestError,
    ManifestStore, RecordedManifest,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::run_context::{GateStage, RunContext, RunError, RunStatus};

use super::checks::{standard_groups, CheckContext, CheckGroup, RunSnapshot};
use super::config::DiagnosticsConfig;
use super::error::{DiagnosticsError, DiagnosticsResult};
use super::governance::Ruleset;
use super::package::EvidencePackage;

pub const EVIDENCE_PACKAGE_FILE: &str = "evidence_package.json";

pub struct DiagnosticsEngine {
    groups: Vec<CheckGroup>,
    config: DiagnosticsConfig,
    store: Arc<dyn ManifestStore>,
    rulesets: BTreeMap<String, Ruleset>,
}

impl DiagnosticsEngine {
    pub fn new(config: DiagnosticsConfig, store: Arc<dyn ManifestStore>) -> Self {
        Self {
            groups: standard_groups(),
            config,
            store,
            rulesets: BTreeMap::new(),
        }
    }

    pub fn with_rulesets(mut self, rulesets: BTreeMap<String, Ruleset>) -> Self {
        self.rulesets = rulesets;
        self
    }

    /// Register an extra group after the existing groups of its level.
    pub fn with_group(mut self, group: CheckGroup) -> Self {
        let at = self
            .groups
            .iter()
            .position(|g| g.level > group.level)
            .unwrap_or(self.groups.len());
        self.groups.insert(at, group);
        self
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    pub fn groups(&self) -> &[CheckGroup] {
        &self.groups
    }

    fn identity(project: &str, dataset: &str) -> String {
        format!("{project}.{dataset}")
    }

    fn build_context(
        &self,
        run: &RunContext,
        level: DiagnosticsLevel,
        datasets: &[DatasetHandle],
    ) -> DiagnosticsResult<CheckContext> {
        let info = run.info();
        let pii = self
            .config
            .pii_patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern)
                    .map(|re| (p.clone(), re))
                    .map_err(|e| ConfigError::InvalidRule {
                        rule_id: p.id.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fingerprint_opts =
            FingerprintOptions::default().dropping(self.config.drop_columns.iter().cloned());
        let checksum_opts = FingerprintOptions::rounded(self.config.rounding_places)
            .dropping(self.config.drop_columns.iter().cloned());

        let mut manifests = BTreeMap::new();
        let mut checksums = BTreeMap::new();
        let mut baselines = BTreeMap::new();
        for ds in datasets {
            if manifests.contains_key(&ds.name) {
                return Err(ManifestError::InvalidDataset {
                    dataset: ds.name.clone(),
                    reason: "supplied more than once".to_string(),
                }
                .into());
            }
            ds.validate()?;
            manifests.insert(ds.name.clone(), build_manifest_with(ds, &fingerprint_opts)?);
            checksums.insert(ds.name.clone(), fingerprint_with(ds, &checksum_opts)?);
            if let Some(recorded) = self.store.get(&Self::identity(&info.project, &ds.name))? {
                baselines.insert(ds.name.clone(), recorded);
            }
        }

        Ok(CheckContext {
            run: RunSnapshot {
                run_id: info.run_id.clone(),
                project: info.project.clone(),
                environment: info.environment.to_string(),
                ruleset: info.ruleset.clone(),
                code_version: info.code_version.clone(),
                artifacts: run.artifacts(),
            },
            level,
            datasets: datasets.to_vec(),
            manifests,
            checksums,
            baselines,
            config: self.config.clone(),
            ruleset: self.rulesets.get(&info.ruleset).cloned(),
            pii,
        })
    }

    /// Run every check of levels `0..=level` and return the aggregated evidence.
    pub async fn run(
        &self,
        run: &RunContext,
        level: u8,
        datasets: &[DatasetHandle],
    ) -> DiagnosticsResult<EvidenceBundle> {
        let level = DiagnosticsLevel::try_from(level)?;
        match run.status() {
            RunStatus::Open => {}
            RunStatus::Corrupted => return Err(RunError::Corrupted(run.run_id().to_string()).into()),
            _ => return Err(RunError::AlreadyClosed(run.run_id().to_string()).into()),
        }

        let started = Instant::now();
        let ctx = Arc::new(self.build_context(run, level, datasets)?);
        let timeout = Duration::from_millis(self.config.check_timeout_ms.max(1));

        let mut checks: Vec<CheckResult> = Vec::new();
        let mut executed = Vec::new();
        for lvl in level.through() {
            let prior = Arc::new(checks.clone());
            let mut set = JoinSet::new();
            for (order, group) in self.groups.iter().filter(|g| g.level == lvl).copied().enumerate() {
                let ctx = Arc::clone(&ctx);
                let prior = Arc::clone(&prior);
                set.spawn(async move { (order, execute_group(group, ctx, prior, timeout).await) });
            }

            let mut joined: Vec<(usize, Vec<CheckResult>)> = Vec::new();
            while let Some(outcome) = set.join_next().await {
                match outcome {
                    Ok(pair) => joined.push(pair),
                    Err(e) => {
                        warn!(run_id = %run.run_id(), level = lvl, error = %e, "check task lost");
                        let mut lost = CheckResult::fail(format!("diagnostics.l{lvl}.lost"), e.to_string());
                        lost.level = lvl;
                        joined.push((usize::MAX, vec![lost]));
                    }
                }
            }
            joined.sort_by_key(|(order, _)| *order);
            let level_checks: Vec<CheckResult> = joined.into_iter().flat_map(|(_, r)| r).collect();

            run.log_event(AuditEvent::checkpoint(
                "diagnostics.level",
                json!({
                    "level": lvl,
                    "checks": level_checks.len(),
                    "status": aggregate(&level_checks),
                }),
            ))?;
            checks.extend(level_checks);
            executed.push(lvl);
        }

        if level.value() >= 2 {
            self.record_baselines(&ctx)?;
        }
        if let Some(dir) = &self.config.evidence_dir {
            self.write_package(run, &checks, dir)?;
        }
        run.ensure_stage(GateStage::DiagnosticsRun)?;

        let bundle = EvidenceBundle::new(run.run_id(), level, executed, checks);
        METRICS.add_checks_executed(bundle.checks.len() as u64);
        obs::emit_diagnostics_completed(
            run.run_id(),
            level.value(),
            bundle.checks.len(),
            &bundle.status.to_string(),
            started.elapsed().as_millis() as u64,
        );
        Ok(bundle)
    }

    fn record_baselines(&self, ctx: &CheckContext) -> DiagnosticsResult<()> {
        for (name, entry) in &ctx.manifests {
            self.store.put(&RecordedManifest {
                identity: Self::identity(&ctx.run.project, name),
                run_id: ctx.run.run_id.clone(),
                recorded_at: Utc::now(),
                entry: entry.clone(),
                checksum: ctx.checksums.get(name).cloned(),
            })?;
        }
        Ok(())
    }

    fn write_package(&self, run: &RunContext, checks: &[CheckResult], dir: &Path) -> DiagnosticsResult<()> {
        let Some(attached) = checks
            .iter()
            .find(|c| c.name == "audit.evidence_package")
            .and_then(|c| c.attachment("package"))
        else {
            return Ok(());
        };
        let package: EvidencePackage = serde_json::from_value(attached.clone())
            .map_err(crate::domain::error::DigestError::from)?;
        let path = dir.join(run.run_id()).join(EVIDENCE_PACKAGE_FILE);
        package.write(&path)?;
        let record = ArtifactRecord::from_file(&path, "diagnostics.evidence_package")?;
        match run.register_artifact(record) {
            Ok(()) => Ok(()),
            Err(RunError::DuplicateArtifact { path, .. }) => {
                debug!(%path, "evidence package already registered; file rewritten");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn stamp(results: &mut [CheckResult], group: &CheckGroup, elapsed: Duration, attempts: u32) {
    for r in results {
        r.level = group.level;
        r.group = group.name.to_string();
        r.duration_ms = elapsed.as_millis() as u64;
        r.attempts = attempts;
    }
}

async fn execute_group(
    group: CheckGroup,
    ctx: Arc<CheckContext>,
    prior: Arc<Vec<CheckResult>>,
    timeout: Duration,
) -> Vec<CheckResult> {
    let max_attempts = if group.idempotent { 2 } else { 1 };
    let mut attempt = 1;
    loop {
        let started = Instant::now();
        let task_ctx = Arc::clone(&ctx);
        let task_prior = Arc::clone(&prior);
        // A timed-out blocking task keeps running; its result is discarded.
        let task = tokio::task::spawn_blocking(move || (group.run)(&task_ctx, &task_prior));
        let failure = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(mut results)) => {
                stamp(&mut results, &group, started.elapsed(), attempt);
                return results;
            }
            Ok(Err(e)) => format!("check group {} panicked: {e}", group.name),
            Err(_) => format!(
                "check group {} timed out after {} ms",
                group.name,
                timeout.as_millis()
            ),
        };
        if attempt < max_attempts {
            METRICS.inc_check_retries();
            warn!(group = group.name, attempt, %failure, "retrying check group");
            attempt += 1;
            continue;
        }
        let mut results = vec![CheckResult::fail(format!("{}.error", group.name), failure)];
        stamp(&mut results, &group, started.elapsed(), attempt);
        return results;
    }
}
