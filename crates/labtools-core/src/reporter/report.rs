//! The build report and the reviewer gate in front of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::artifact::ArtifactRecord;
use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::digest::digest_of;
use crate::domain::evidence::{CheckStatus, EvidenceBundle};
use crate::domain::level::DiagnosticsLevel;
use crate::domain::validation::{aggregate, TierStatus, ValidationResult, ValidationSummary};
use crate::manifest::ManifestDiff;
use crate::obs;
use crate::run_context::{GateStage, LabEnvironment, RunContext};

use super::outcome::ExitOutcome;
use super::{ReportError, ReportResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportPolicy {
    /// Diagnostics level the evidence must cover. Defaults to the run's level.
    pub required_level: Option<u8>,
}

/// Run identity as captured when the report was composed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRunMetadata {
    pub run_id: String,
    pub project: String,
    pub environment: LabEnvironment,
    pub ruleset: String,
    pub diag_level: DiagnosticsLevel,
    pub code_version: String,
    pub prior_run_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactRecord>,
    pub audit_events: usize,
    /// Blocked policy violations recorded in the audit log.
    pub policy_violations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub reviewer: String,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reviewer: String,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

/// Immutable once approved or rejected. The digest covers everything except
/// the reviewer decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    report_id: String,
    generated_at: DateTime<Utc>,
    run: ReportRunMetadata,
    evidence: EvidenceBundle,
    validation_results: Vec<ValidationResult>,
    validation_summary: ValidationSummary,
    manifest_diff: Option<ManifestDiff>,
    #[serde(default)]
    digest: String,
    approval: Option<Approval>,
    rejection: Option<Rejection>,
}

/// Violations that were refused. Warn-mode violations are allowed and not counted.
fn is_blocked_violation(event: &AuditEvent) -> bool {
    event.kind != AuditKind::Checkpoint
        && event.is_blocked()
        && event.payload.get("violation").and_then(|v| v.as_bool()) == Some(true)
}

impl BuildReport {
    fn new(
        run: ReportRunMetadata,
        evidence: EvidenceBundle,
        validation_results: Vec<ValidationResult>,
        manifest_diff: Option<ManifestDiff>,
    ) -> ReportResult<Self> {
        let validation_summary = aggregate(&validation_results);
        let mut report = Self {
            report_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            run,
            evidence,
            validation_results,
            validation_summary,
            manifest_diff,
            digest: String::new(),
            approval: None,
            rejection: None,
        };
        report.digest = report.compute_digest()?;
        Ok(report)
    }

    fn compute_digest(&self) -> ReportResult<String> {
        let unsigned = Self {
            digest: String::new(),
            approval: None,
            rejection: None,
            ..self.clone()
        };
        Ok(digest_of(&unsigned)?)
    }

    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn run(&self) -> &ReportRunMetadata {
        &self.run
    }

    pub fn evidence(&self) -> &EvidenceBundle {
        &self.evidence
    }

    pub fn validation_results(&self) -> &[ValidationResult] {
        &self.validation_results
    }

    pub fn validation_summary(&self) -> &ValidationSummary {
        &self.validation_summary
    }

    pub fn manifest_diff(&self) -> Option<&ManifestDiff> {
        self.manifest_diff.as_ref()
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn approval(&self) -> Option<&Approval> {
        self.approval.as_ref()
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }

    pub fn is_approved(&self) -> bool {
        self.approval.is_some()
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    /// True when the stored digest still matches the report content.
    pub fn verify_digest(&self) -> bool {
        self.compute_digest().map(|d| d == self.digest).unwrap_or(false)
    }

    /// Reasons the gate is closed. Empty when the report may be approved.
    pub fn gate_blockers(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.evidence.status != CheckStatus::Pass {
            reasons.push(format!("evidence status is {}", self.evidence.status));
        }
        for tier in self.validation_summary.failing_tiers() {
            reasons.push(format!("validation tier {tier} failed"));
        }
        reasons
    }

    pub fn gate_ready(&self) -> bool {
        self.gate_blockers().is_empty()
    }

    fn decision_blocker(&self) -> Option<ReportError> {
        if self.approval.is_some() {
            return Some(ReportError::AlreadyApproved {
                report_id: self.report_id.clone(),
            });
        }
        if self.rejection.is_some() {
            return Some(ReportError::AlreadyRejected {
                report_id: self.report_id.clone(),
            });
        }
        None
    }

    fn approval_blocker(&self) -> Option<ReportError> {
        if let Some(err) = self.decision_blocker() {
            return Some(err);
        }
        let reasons = self.gate_blockers();
        (!reasons.is_empty()).then_some(ReportError::GateNotReady { reasons })
    }

    /// Record the reviewer's approval. Fails unless the gate is open.
    pub fn approve(&mut self, reviewer: &str) -> ReportResult<()> {
        if let Some(err) = self.approval_blocker() {
            return Err(err);
        }
        self.approval = Some(Approval {
            reviewer: reviewer.to_string(),
            approved_at: Utc::now(),
        });
        Ok(())
    }

    /// Record a rejection. Terminal: the report can no longer be approved.
    pub fn reject(&mut self, reviewer: &str, reason: &str) -> ReportResult<()> {
        if let Some(err) = self.decision_blocker() {
            return Err(err);
        }
        self.rejection = Some(Rejection {
            reviewer: reviewer.to_string(),
            reason: reason.to_string(),
            rejected_at: Utc::now(),
        });
        Ok(())
    }

    pub fn outcome(&self) -> ExitOutcome {
        if self.is_approved() {
            return ExitOutcome::Success;
        }
        if self.run.policy_violations > 0 {
            return ExitOutcome::PolicyViolation;
        }
        if self.validation_summary.overall() == TierStatus::Fail {
            return ExitOutcome::ValidationFailure;
        }
        if self.is_rejected() || !self.gate_ready() {
            return ExitOutcome::GateNotReady;
        }
        ExitOutcome::Success
    }
}

/// Composes reports and records reviewer decisions against the run.
#[derive(Debug, Clone, Default)]
pub struct BuildReporter {
    policy: ReportPolicy,
}

impl BuildReporter {
    pub fn new(policy: ReportPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ReportPolicy {
        &self.policy
    }

    pub fn compose(
        &self,
        run: &RunContext,
        evidence: EvidenceBundle,
        validation_results: Vec<ValidationResult>,
        manifest_diff: Option<ManifestDiff>,
    ) -> ReportResult<BuildReport> {
        if evidence.run_id != run.run_id() {
            return Err(ReportError::RunMismatch {
                run_id: run.run_id().to_string(),
                evidence_run: evidence.run_id.clone(),
            });
        }
        let info = run.info();
        let required = self
            .policy
            .required_level
            .unwrap_or_else(|| info.diag_level.value());
        if !evidence.covers(required) {
            return Err(ReportError::IncompleteEvidence {
                required,
                executed: evidence.levels_executed.clone(),
            });
        }

        let audit_log = run.audit_log();
        let metadata = ReportRunMetadata {
            run_id: info.run_id.clone(),
            project: info.project.clone(),
            environment: info.environment,
            ruleset: info.ruleset.clone(),
            diag_level: info.diag_level,
            code_version: info.code_version.clone(),
            prior_run_id: info.prior_run_id.clone(),
            started_at: info.started_at,
            artifacts: run.artifacts(),
            audit_events: audit_log.len(),
            policy_violations: audit_log.iter().filter(|e| is_blocked_violation(e)).count(),
        };
        let report = BuildReport::new(metadata, evidence, validation_results, manifest_diff)?;

        run.ensure_stage(GateStage::Reported)?;
        run.log_event(AuditEvent::checkpoint(
            "report.composed",
            json!({
                "report_id": report.report_id,
                "digest": report.digest,
                "gate_ready": report.gate_ready(),
            }),
        ))?;
        obs::emit_gate_evaluated(
            run.run_id(),
            &report.evidence.status.to_string(),
            &report.validation_summary.overall().to_string(),
            report.gate_ready(),
        );
        Ok(report)
    }

    /// Approve `report` and move the run to `Approved`.
    pub fn approve(&self, run: &RunContext, report: &mut BuildReport, reviewer: &str) -> ReportResult<()> {
        if let Some(err) = report.approval_blocker() {
            run.log_event(AuditEvent::checkpoint(
                "report.approval_refused",
                json!({ "report_id": report.report_id, "reviewer": reviewer, "error": err.to_string() }),
            ))?;
            return Err(err);
        }
        run.advance_stage(GateStage::Approved)?;
        report.approve(reviewer)?;
        run.log_event(AuditEvent::checkpoint(
            "report.approved",
            json!({ "report_id": report.report_id, "reviewer": reviewer }),
        ))?;
        obs::emit_report_decided(run.run_id(), reviewer, true);
        Ok(())
    }

    /// Reject `report` and move the run to the terminal `Rejected` stage.
    pub fn reject(
        &self,
        run: &RunContext,
        report: &mut BuildReport,
        reviewer: &str,
        reason: &str,
    ) -> ReportResult<()> {
        if let Some(err) = report.decision_blocker() {
            return Err(err);
        }
        run.advance_stage(GateStage::Rejected)?;
        report.reject(reviewer, reason)?;
        run.log_event(AuditEvent::checkpoint(
            "report.rejected",
            json!({ "report_id": report.report_id, "reviewer": reviewer, "reason": reason }),
        ))?;
        obs::emit_report_decided(run.run_id(), reviewer, false);
        Ok(())
    }
}
