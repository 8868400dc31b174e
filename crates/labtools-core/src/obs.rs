//! Structured tracing hooks for governed runs.
//!
//! Every lifecycle event is emitted at `info!` (or `warn!` for failures) with
//! an `event` field, so JSON log pipelines can filter on it.

use tracing::{info, warn};

/// RAII guard that tags every record emitted while it lives with the run id.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("labtools.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_run_opened(run_id: &str, project: &str, environment: &str, diag_level: u8) {
    info!(
        event = "run.opened",
        run_id = %run_id,
        project = %project,
        environment = %environment,
        diag_level = diag_level,
    );
}

pub fn emit_run_finalized(run_id: &str, duration_ms: u64, audit_events: usize, artifacts: usize) {
    info!(
        event = "run.finalized",
        run_id = %run_id,
        duration_ms = duration_ms,
        audit_events = audit_events,
        artifacts = artifacts,
    );
}

pub fn emit_run_corrupted(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.corrupted", run_id = %run_id, error = %error);
}

pub fn emit_run_cancelled(run_id: &str, reason: &str) {
    warn!(event = "run.cancelled", run_id = %run_id, reason = %reason);
}

pub fn emit_stage_advanced(run_id: &str, from: &str, to: &str) {
    info!(event = "run.stage", run_id = %run_id, from = %from, to = %to);
}

pub fn emit_policy_decision(run_id: &str, kind: &str, decision: &str, violation: bool) {
    if violation {
        warn!(
            event = "policy.decision",
            run_id = %run_id,
            kind = %kind,
            decision = %decision,
            violation = true,
        );
    } else {
        info!(
            event = "policy.decision",
            run_id = %run_id,
            kind = %kind,
            decision = %decision,
            violation = false,
        );
    }
}

pub fn emit_diagnostics_completed(run_id: &str, level: u8, checks: usize, status: &str, duration_ms: u64) {
    info!(
        event = "diagnostics.completed",
        run_id = %run_id,
        level = level,
        checks = checks,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_validation_completed(run_id: &str, scripts: usize, overall: &str, duration_ms: u64) {
    info!(
        event = "validation.completed",
        run_id = %run_id,
        scripts = scripts,
        overall = %overall,
        duration_ms = duration_ms,
    );
}

pub fn emit_gate_evaluated(run_id: &str, evidence: &str, validation: &str, ready: bool) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        evidence = %evidence,
        validation = %validation,
        ready = ready,
    );
}

pub fn emit_report_decided(run_id: &str, reviewer: &str, approved: bool) {
    let event = if approved {
        "report.approved"
    } else {
        "report.rejected"
    };
    info!(
        event = event,
        run_id = %run_id,
        reviewer = %reviewer,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        let _span = RunSpan::enter("20260101T000000000Z_test_abcd1234");
        emit_run_opened("r", "p", "test", 3);
        emit_policy_decision("r", "subprocess_attempt", "blocked", true);
        emit_report_decided("r", "alice", true);
        emit_run_finalized("r", 12, 3, 1);
    }
}
