//! The run ledger: identity, audit trail and artifact registry of one
//! governed execution.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::artifact::ArtifactRecord;
use crate::domain::audit::AuditEvent;
use crate::domain::error::ConfigError;
use crate::domain::level::DiagnosticsLevel;
use crate::git;
use crate::metrics::METRICS;
use crate::obs;
use crate::run_context::cancel::CancelSignal;
use crate::run_context::environment::{self, LabEnvironment};
use crate::run_context::error::{RunError, RunResult};
use crate::run_context::sink::{AuditSink, MemoryAuditSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Open,
    Finalizing,
    Closed,
    Corrupted,
}

/// Governance stage. Moves forward only; `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    Open,
    DiagnosticsRun,
    Validated,
    Reported,
    Approved,
    Rejected,
}

impl GateStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, GateStage::Approved | GateStage::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateStage::Open => "open",
            GateStage::DiagnosticsRun => "diagnostics_run",
            GateStage::Validated => "validated",
            GateStage::Reported => "reported",
            GateStage::Approved => "approved",
            GateStage::Rejected => "rejected",
        }
    }
}

impl fmt::Display for GateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable identity of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    #[serde(skip)]
    run_token: String,
    pub project: String,
    pub environment: LabEnvironment,
    pub ruleset: String,
    pub diag_level: DiagnosticsLevel,
    pub code_version: String,
    pub prior_run_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Snapshot written when a run closes (or is corrupted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub project: String,
    pub environment: LabEnvironment,
    pub ruleset: String,
    pub diag_level: DiagnosticsLevel,
    pub code_version: String,
    pub prior_run_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub stage: GateStage,
    pub cancelled: bool,
    pub cancel_reason: Option<String>,
    pub artifacts: Vec<ArtifactRecord>,
    pub audit_log: Vec<AuditEvent>,
}

/// Options for [`RunContext::open`].
pub struct RunOptions {
    pub level: DiagnosticsLevel,
    pub sink: Arc<dyn AuditSink>,
    /// Export `LAB_*` variables into the process environment.
    pub export_env: bool,
    /// When set, the ruleset must be one of these.
    pub known_rulesets: Option<BTreeSet<String>>,
    pub code_version: Option<String>,
    pub prior_run_id: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            level: DiagnosticsLevel::default(),
            sink: Arc::new(MemoryAuditSink::new()),
            export_env: true,
            known_rulesets: None,
            code_version: None,
            prior_run_id: None,
        }
    }
}

impl RunOptions {
    pub fn with_level(mut self, level: DiagnosticsLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn without_env_export(mut self) -> Self {
        self.export_env = false;
        self
    }

    pub fn with_known_rulesets<I, S>(mut self, rulesets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_rulesets = Some(rulesets.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_code_version(mut self, version: impl Into<String>) -> Self {
        self.code_version = Some(version.into());
        self
    }

    /// Link this run to an earlier run it retries.
    pub fn retry_of(mut self, prior_run_id: impl Into<String>) -> Self {
        self.prior_run_id = Some(prior_run_id.into());
        self
    }
}

struct RunState {
    status: RunStatus,
    stage: GateStage,
    artifacts: Vec<ArtifactRecord>,
    artifact_paths: HashSet<String>,
    audit_log: Vec<AuditEvent>,
    ended_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
}

struct Ledger {
    info: RunInfo,
    state: Mutex<RunState>,
    sink: Arc<dyn AuditSink>,
    cancel: CancelSignal,
    exported_env: bool,
}

impl Ledger {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run_id(&self) -> &str {
        &self.info.run_id
    }

    fn ensure_open(&self, state: &RunState) -> RunResult<()> {
        match state.status {
            RunStatus::Open => Ok(()),
            RunStatus::Corrupted => Err(RunError::Corrupted(self.info.run_id.clone())),
            RunStatus::Finalizing | RunStatus::Closed => {
                Err(RunError::AlreadyClosed(self.info.run_id.clone()))
            }
        }
    }

    fn append(&self, mut event: AuditEvent) -> RunResult<u64> {
        let mut state = self.lock();
        self.ensure_open(&state)?;
        event.seq = state.audit_log.len() as u64;
        if let Err(source) = self.sink.append(self.run_id(), &event) {
            self.corrupt(&mut state, &source);
            return Err(RunError::LogWrite {
                run_id: self.info.run_id.clone(),
                source,
            });
        }
        let seq = event.seq;
        state.audit_log.push(event);
        METRICS.inc_audit_events();
        Ok(seq)
    }

    /// Mark the run corrupted and close it out with a best-effort summary.
    fn corrupt(&self, state: &mut RunState, error: &dyn fmt::Display) {
        state.status = RunStatus::Corrupted;
        state.ended_at = Some(Utc::now());
        obs::emit_run_corrupted(self.run_id(), error);
        let summary = self.summary(state);
        if let Err(e) = self.sink.flush(&summary) {
            tracing::warn!(run_id = %self.run_id(), error = %e, "failed to flush corrupted run summary");
        }
        self.release_env();
    }

    fn release_env(&self) {
        if self.exported_env {
            environment::clear_if_owned(self.run_id());
        }
    }

    fn summary(&self, state: &RunState) -> RunSummary {
        let info = &self.info;
        let duration_ms = state
            .ended_at
            .map(|end| (end - info.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        RunSummary {
            run_id: info.run_id.clone(),
            project: info.project.clone(),
            environment: info.environment,
            ruleset: info.ruleset.clone(),
            diag_level: info.diag_level,
            code_version: info.code_version.clone(),
            prior_run_id: info.prior_run_id.clone(),
            started_at: info.started_at,
            ended_at: state.ended_at,
            duration_ms,
            status: state.status,
            stage: state.stage,
            cancelled: state.cancel_reason.is_some(),
            cancel_reason: state.cancel_reason.clone(),
            artifacts: state.artifacts.clone(),
            audit_log: state.audit_log.clone(),
        }
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        let status = self.lock().status;
        if status == RunStatus::Open {
            tracing::warn!(run_id = %self.info.run_id, "run dropped without finalize");
            self.release_env();
        }
    }
}

/// A governed execution. Share it across workers behind an `Arc`.
pub struct RunContext {
    ledger: Arc<Ledger>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.ledger.info.run_id)
            .field("status", &self.status())
            .finish()
    }
}

fn generate_run_id(environment: LabEnvironment) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
        environment,
        &uuid[..8]
    )
}

fn generate_run_token() -> String {
    format!("lab_{}", Uuid::new_v4().simple())
}

impl RunContext {
    /// Open a new run and, unless disabled, export its variables.
    pub fn open(project: &str, environment: &str, ruleset: &str, options: RunOptions) -> RunResult<Self> {
        let environment: LabEnvironment = environment.parse()?;
        if project.trim().is_empty() {
            return Err(ConfigError::Invalid("project name must not be empty".to_string()).into());
        }
        if let Some(known) = &options.known_rulesets {
            if !known.contains(ruleset) {
                return Err(ConfigError::UnknownRuleset(ruleset.to_string()).into());
            }
        }

        let code_version = git::resolve_code_version(options.code_version.as_deref(), Path::new("."));
        let info = RunInfo {
            run_id: generate_run_id(environment),
            run_token: generate_run_token(),
            project: project.to_string(),
            environment,
            ruleset: ruleset.to_string(),
            diag_level: options.level,
            code_version,
            prior_run_id: options.prior_run_id,
            started_at: Utc::now(),
        };

        let ledger = Arc::new(Ledger {
            info,
            state: Mutex::new(RunState {
                status: RunStatus::Open,
                stage: GateStage::Open,
                artifacts: Vec::new(),
                artifact_paths: HashSet::new(),
                audit_log: Vec::new(),
                ended_at: None,
                cancel_reason: None,
            }),
            sink: options.sink,
            cancel: CancelSignal::new(),
            exported_env: options.export_env,
        });
        let run = Self { ledger };
        if options.export_env {
            environment::export(&run.env_vars());
        }
        obs::emit_run_opened(
            run.run_id(),
            project,
            environment.as_str(),
            run.info().diag_level.value(),
        );
        Ok(run)
    }

    pub fn info(&self) -> &RunInfo {
        &self.ledger.info
    }

    pub fn run_id(&self) -> &str {
        &self.ledger.info.run_id
    }

    /// Secret token identifying children launched by this run.
    pub fn run_token(&self) -> &str {
        &self.ledger.info.run_token
    }

    pub fn status(&self) -> RunStatus {
        self.ledger.lock().status
    }

    pub fn stage(&self) -> GateStage {
        self.ledger.lock().stage
    }

    pub fn is_open(&self) -> bool {
        self.status() == RunStatus::Open
    }

    /// Variables a managed child process must receive.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let info = self.info();
        vec![
            (environment::ENV_RUN_ID.to_string(), info.run_id.clone()),
            (environment::ENV_RUN_TOKEN.to_string(), info.run_token.clone()),
            (environment::ENV_DIAG.to_string(), info.diag_level.to_string()),
            (environment::ENV_RULESET.to_string(), info.ruleset.clone()),
            (environment::ENV_GIT_SHA.to_string(), info.code_version.clone()),
        ]
    }

    /// Append an event to the audit log. Returns its sequence number.
    pub fn log_event(&self, event: AuditEvent) -> RunResult<u64> {
        self.ledger.append(event)
    }

    /// A non-owning handle other components use to append audit events.
    pub fn appender(&self) -> AuditAppender {
        AuditAppender {
            run_id: self.run_id().to_string(),
            ledger: Arc::downgrade(&self.ledger),
        }
    }

    pub fn register_artifact(&self, record: ArtifactRecord) -> RunResult<()> {
        let mut state = self.ledger.lock();
        self.ledger.ensure_open(&state)?;
        if !state.artifact_paths.insert(record.path.clone()) {
            return Err(RunError::DuplicateArtifact {
                run_id: self.run_id().to_string(),
                path: record.path,
            });
        }
        state.artifacts.push(record);
        Ok(())
    }

    pub fn artifacts(&self) -> Vec<ArtifactRecord> {
        self.ledger.lock().artifacts.clone()
    }

    pub fn audit_log(&self) -> Vec<AuditEvent> {
        self.ledger.lock().audit_log.clone()
    }

    pub fn audit_len(&self) -> usize {
        self.ledger.lock().audit_log.len()
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.ledger.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.ledger.cancel.is_cancelled()
    }

    /// Request cooperative cancellation. Recorded as a checkpoint; the run
    /// still has to be finalized.
    pub fn cancel(&self, reason: &str) -> RunResult<()> {
        {
            let mut state = self.ledger.lock();
            self.ledger.ensure_open(&state)?;
            if state.cancel_reason.is_none() {
                state.cancel_reason = Some(reason.to_string());
            }
        }
        self.ledger.cancel.cancel();
        obs::emit_run_cancelled(self.run_id(), reason);
        self.log_event(AuditEvent::checkpoint(
            "run.cancelled",
            serde_json::json!({ "reason": reason }),
        ))?;
        Ok(())
    }

    /// Move the governance stage forward to `to`.
    ///
    /// Approval and rejection are reachable only from `Reported`.
    pub fn advance_stage(&self, to: GateStage) -> RunResult<()> {
        let from = {
            let mut state = self.ledger.lock();
            self.ledger.ensure_open(&state)?;
            let from = state.stage;
            let allowed = !from.is_terminal()
                && to > from
                && (!to.is_terminal() || from == GateStage::Reported);
            if !allowed {
                return Err(RunError::InvalidStageTransition {
                    run_id: self.run_id().to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            state.stage = to;
            from
        };
        obs::emit_stage_advanced(self.run_id(), from.as_str(), to.as_str());
        self.log_event(AuditEvent::checkpoint(
            "stage",
            serde_json::json!({ "from": from, "to": to }),
        ))?;
        Ok(())
    }

    /// Advance to `stage` unless the run is already there or beyond.
    pub fn ensure_stage(&self, stage: GateStage) -> RunResult<()> {
        let current = self.stage();
        if current >= stage && !current.is_terminal() {
            return Ok(());
        }
        self.advance_stage(stage)
    }

    /// Close the run: flush the summary and release exported variables.
    ///
    /// Not idempotent; a second call fails with `AlreadyClosed`.
    pub fn finalize(&self) -> RunResult<RunSummary> {
        let ledger = &self.ledger;
        let mut state = ledger.lock();
        ledger.ensure_open(&state)?;
        state.status = RunStatus::Finalizing;
        state.ended_at = Some(Utc::now());

        let mut summary = ledger.summary(&state);
        summary.status = RunStatus::Closed;
        if let Err(source) = ledger.sink.flush(&summary) {
            state.status = RunStatus::Corrupted;
            obs::emit_run_corrupted(self.run_id(), &source);
            ledger.release_env();
            return Err(RunError::Flush {
                run_id: self.run_id().to_string(),
                source,
            });
        }
        state.status = RunStatus::Closed;
        drop(state);

        ledger.release_env();
        METRICS.inc_runs_finalized();
        obs::emit_run_finalized(
            self.run_id(),
            summary.duration_ms,
            summary.audit_log.len(),
            summary.artifacts.len(),
        );
        Ok(summary)
    }

    /// Current summary without closing the run.
    pub fn summary(&self) -> RunSummary {
        let state = self.ledger.lock();
        self.ledger.summary(&state)
    }
}

/// Append-only view of a run's audit log, held by the enforcer and
/// diagnostics without keeping the run alive.
#[derive(Clone)]
pub struct AuditAppender {
    run_id: String,
    ledger: Weak<Ledger>,
}

impl fmt::Debug for AuditAppender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditAppender")
            .field("run_id", &self.run_id)
            .finish()
    }
}

impl AuditAppender {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn ledger(&self) -> RunResult<Arc<Ledger>> {
        self.ledger
            .upgrade()
            .ok_or_else(|| RunError::Detached(self.run_id.clone()))
    }

    pub fn log_event(&self, event: AuditEvent) -> RunResult<u64> {
        self.ledger()?.append(event)
    }

    /// Cancel the run on behalf of a component that only holds an appender.
    pub fn request_cancel(&self, reason: &str) -> RunResult<()> {
        RunContext {
            ledger: self.ledger()?,
        }
        .cancel(reason)
    }
}
