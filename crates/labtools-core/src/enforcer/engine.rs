//! Process-wide execution enforcer.
//!
//! At most one run may be attached at a time. Every intercepted operation is
//! written to the attached run's audit log before the decision is returned.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::audit::{AuditEvent, AuditKind, Decision};
use crate::metrics::METRICS;
use crate::obs;
use crate::run_context::{AuditAppender, RunContext};

use super::error::{EnforcerError, EnforcerResult, PolicyViolation, ViolationKind};
use super::policy::{normalize, EnforcementPolicy, InterceptedOp};
use super::request::{FileOp, SpawnRequest};
use super::rules::{CompiledRuleSet, PatternMatch};

struct Attachment {
    run_id: String,
    run_token: String,
    policy: EnforcementPolicy,
    rules: CompiledRuleSet,
    audit: AuditAppender,
    active: AtomicBool,
}

type Slot = Arc<Mutex<Option<Arc<Attachment>>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Arc<Attachment>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

static GLOBAL: OnceLock<ExecutionEnforcer> = OnceLock::new();

/// Holds the single active attachment. Use [`ExecutionEnforcer::global`] in
/// production; independent instances are for embedding and tests.
#[derive(Clone, Default)]
pub struct ExecutionEnforcer {
    slot: Slot,
}

impl ExecutionEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static ExecutionEnforcer {
        GLOBAL.get_or_init(ExecutionEnforcer::new)
    }

    /// Attach to `run`. Fails if another attachment is active.
    pub fn attach(&self, run: &RunContext, policy: EnforcementPolicy) -> EnforcerResult<EnforcerHandle> {
        let rules = CompiledRuleSet::compile(&policy.throwaway_rules)?;
        let mut slot = lock(&self.slot);
        if let Some(existing) = slot.as_ref() {
            return Err(EnforcerError::AlreadyAttached {
                run_id: existing.run_id.clone(),
            });
        }
        let attachment = Arc::new(Attachment {
            run_id: run.run_id().to_string(),
            run_token: run.run_token().to_string(),
            policy,
            rules,
            audit: run.appender(),
            active: AtomicBool::new(true),
        });
        *slot = Some(Arc::clone(&attachment));
        info!(
            event = "enforcer.attached",
            run_id = %attachment.run_id,
            strictness = ?attachment.policy.strictness,
            rules = attachment.rules.len(),
        );
        Ok(EnforcerHandle {
            attachment,
            slot: Arc::clone(&self.slot),
        })
    }

    /// Detach whatever is attached. Safe to call repeatedly.
    pub fn detach(&self) {
        if let Some(previous) = lock(&self.slot).take() {
            previous.active.store(false, Ordering::SeqCst);
            info!(event = "enforcer.detached", run_id = %previous.run_id);
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.slot).is_some()
    }

    pub fn current(&self) -> Option<EnforcerHandle> {
        lock(&self.slot).as_ref().map(|attachment| EnforcerHandle {
            attachment: Arc::clone(attachment),
            slot: Arc::clone(&self.slot),
        })
    }

    /// Check a spawn against the active attachment; allowed when none is attached.
    pub fn check_subprocess(&self, request: &SpawnRequest) -> EnforcerResult<Decision> {
        match self.current() {
            Some(handle) => handle.check_subprocess(request),
            None => Ok(Decision::Allowed),
        }
    }

    pub fn check_file_access(&self, path: &Path, op: FileOp) -> EnforcerResult<Decision> {
        match self.current() {
            Some(handle) => handle.check_file_access(path, op),
            None => Ok(Decision::Allowed),
        }
    }
}

/// Capability returned by [`ExecutionEnforcer::attach`].
#[derive(Clone)]
pub struct EnforcerHandle {
    attachment: Arc<Attachment>,
    slot: Slot,
}

impl std::fmt::Debug for EnforcerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcerHandle")
            .field("run_id", &self.attachment.run_id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl EnforcerHandle {
    pub fn run_id(&self) -> &str {
        &self.attachment.run_id
    }

    pub fn policy(&self) -> &EnforcementPolicy {
        &self.attachment.policy
    }

    pub fn is_active(&self) -> bool {
        self.attachment.active.load(Ordering::SeqCst)
    }

    /// Release the attachment. Idempotent; a stale handle never detaches a
    /// newer attachment.
    pub fn detach(&self) {
        let mut slot = lock(&self.slot);
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &self.attachment))
        {
            slot.take();
        }
        if self.attachment.active.swap(false, Ordering::SeqCst) {
            info!(event = "enforcer.detached", run_id = %self.attachment.run_id);
        }
    }

    fn intercepting(&self, op: InterceptedOp) -> bool {
        self.is_active() && self.attachment.policy.intercepts(op)
    }

    fn decision_for_violation(&self) -> Decision {
        if self.attachment.policy.is_blocking() {
            Decision::Blocked
        } else {
            Decision::Allowed
        }
    }

    fn record(&self, kind: AuditKind, decision: Decision, violation: bool, payload: serde_json::Value) -> EnforcerResult<()> {
        let mut payload = payload;
        if let Some(map) = payload.as_object_mut() {
            map.insert("violation".to_string(), json!(violation));
        }
        self.attachment
            .audit
            .log_event(AuditEvent::new(kind, decision, payload))?;
        obs::emit_policy_decision(
            &self.attachment.run_id,
            kind.as_str(),
            match decision {
                Decision::Allowed => "allowed",
                Decision::Blocked => "blocked",
            },
            violation,
        );
        Ok(())
    }

    fn resolve(&self, violation: PolicyViolation, decision: Decision) -> EnforcerResult<Decision> {
        METRICS.inc_policy_violations();
        if self.attachment.policy.fatal {
            if let Err(e) = self.attachment.audit.request_cancel(&violation.to_string()) {
                warn!(run_id = %self.attachment.run_id, error = %e, "could not cancel run after fatal violation");
            }
        }
        match decision {
            Decision::Blocked => Err(violation.into()),
            Decision::Allowed => {
                warn!(run_id = %self.attachment.run_id, %violation, "policy violation allowed in warn mode");
                Ok(Decision::Allowed)
            }
        }
    }

    /// Authorize a subprocess spawn. Children must carry this run's token.
    pub fn check_subprocess(&self, request: &SpawnRequest) -> EnforcerResult<Decision> {
        if !self.intercepting(InterceptedOp::Subprocess) {
            return Ok(Decision::Allowed);
        }
        let classification = request.classify(&self.attachment.run_token);
        let violation = !classification.is_managed();
        let decision = if violation {
            self.decision_for_violation()
        } else {
            Decision::Allowed
        };
        self.record(
            AuditKind::SubprocessAttempt,
            decision,
            violation,
            json!({
                "program": request.program,
                "args": request.args,
                "classification": classification,
            }),
        )?;
        if !violation {
            return Ok(decision);
        }
        self.resolve(
            PolicyViolation {
                kind: ViolationKind::UnmanagedSubprocess,
                detail: format!("{} ({:?})", request.command_line(), classification),
                matches: Vec::new(),
            },
            decision,
        )
    }

    pub fn authorize_command(&self, cmd: &std::process::Command) -> EnforcerResult<Decision> {
        self.check_subprocess(&SpawnRequest::from_command(cmd))
    }

    /// Authorize then spawn a blocking child process.
    pub fn spawn(&self, cmd: &mut std::process::Command) -> EnforcerResult<std::process::Child> {
        self.authorize_command(cmd)?;
        Ok(cmd.spawn()?)
    }

    /// Authorize a file read or write. Paths outside protected roots pass
    /// without an audit entry.
    pub fn check_file_access(&self, path: &Path, op: FileOp) -> EnforcerResult<Decision> {
        let intercepted = match op {
            FileOp::Read => InterceptedOp::FileRead,
            FileOp::Write => InterceptedOp::FileWrite,
        };
        if !self.intercepting(intercepted) {
            return Ok(Decision::Allowed);
        }
        let policy = &self.attachment.policy;
        let normalized = normalize(path);
        let under_protected = policy
            .protected_paths
            .iter()
            .any(|root| normalized.starts_with(normalize(root)));
        if !under_protected {
            debug!(path = %path.display(), "file access outside protected roots");
            return Ok(Decision::Allowed);
        }
        let violation = policy.protects(path);
        let decision = if violation {
            self.decision_for_violation()
        } else {
            Decision::Allowed
        };
        self.record(
            AuditKind::FileAccess,
            decision,
            violation,
            json!({ "path": normalized, "op": op }),
        )?;
        if !violation {
            return Ok(decision);
        }
        self.resolve(
            PolicyViolation {
                kind: ViolationKind::ProtectedPathAccess,
                detail: format!("{:?} {}", op, normalized.display()),
                matches: Vec::new(),
            },
            decision,
        )
    }

    /// Scan source text for throwaway patterns. Every match is logged; the
    /// call fails if any match reaches the blocking severity under a
    /// blocking policy.
    pub fn scan_source(&self, origin: &str, source: &str) -> EnforcerResult<Vec<PatternMatch>> {
        let matches = self.attachment.rules.scan(source);
        if !self.is_active() {
            return Ok(matches);
        }
        let threshold = self.attachment.policy.block_severity;
        let mut violating = Vec::new();
        for m in &matches {
            let violation = m.severity >= threshold;
            let decision = if violation {
                self.decision_for_violation()
            } else {
                Decision::Allowed
            };
            self.record(
                AuditKind::PolicyViolation,
                decision,
                violation,
                json!({
                    "origin": origin,
                    "rule_id": m.rule_id,
                    "severity": m.severity,
                    "line": m.line,
                    "excerpt": m.excerpt,
                }),
            )?;
            if violation {
                violating.push(m.clone());
            }
        }
        if violating.is_empty() {
            return Ok(matches);
        }
        let detail = format!(
            "{}: {}",
            origin,
            violating
                .iter()
                .map(|m| match m.line {
                    Some(line) => format!("{} at line {}", m.rule_id, line),
                    None => m.rule_id.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ")
        );
        let decision = self.decision_for_violation();
        self.resolve(
            PolicyViolation {
                kind: ViolationKind::ThrowawayPattern,
                detail,
                matches: violating,
            },
            decision,
        )?;
        Ok(matches)
    }

    pub fn scan_file(&self, path: &Path) -> EnforcerResult<Vec<PatternMatch>> {
        let source = std::fs::read_to_string(path)?;
        self.scan_source(&path.display().to_string(), &source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_context::{MemoryAuditSink, RunOptions};

    fn open_run() -> RunContext {
        RunContext::open(
            "enforcer-unit",
            "test",
            "default",
            RunOptions::default()
                .with_sink(Arc::new(MemoryAuditSink::new()))
                .without_env_export()
                .with_code_version("test"),
        )
        .expect("open run")
    }

    #[test]
    fn test_second_attach_rejected_until_detach() {
        let enforcer = ExecutionEnforcer::new();
        let first = open_run();
        let second = open_run();
        let handle = enforcer
            .attach(&first, EnforcementPolicy::default())
            .expect("attach");
        match enforcer.attach(&second, EnforcementPolicy::default()) {
            Err(EnforcerError::AlreadyAttached { run_id }) => assert_eq!(run_id, first.run_id()),
            other => panic!("expected AlreadyAttached, got {:?}", other.map(|_| ())),
        }
        handle.detach();
        handle.detach();
        assert!(!enforcer.is_attached());
        enforcer
            .attach(&second, EnforcementPolicy::default())
            .expect("reattach");
    }

    #[test]
    fn test_stale_handle_does_not_detach_newer() {
        let enforcer = ExecutionEnforcer::new();
        let run = open_run();
        let old = enforcer.attach(&run, EnforcementPolicy::default()).expect("attach");
        enforcer.detach();
        let _new = enforcer.attach(&run, EnforcementPolicy::default()).expect("attach again");
        old.detach();
        assert!(enforcer.is_attached());
    }

    #[test]
    fn test_detached_handle_allows_without_logging() {
        let enforcer = ExecutionEnforcer::new();
        let run = open_run();
        let handle = enforcer.attach(&run, EnforcementPolicy::default()).expect("attach");
        handle.detach();
        let decision = handle
            .check_subprocess(&SpawnRequest::new("curl", ["x"]).without_token())
            .expect("allowed");
        assert_eq!(decision, Decision::Allowed);
        assert_eq!(run.audit_len(), 0);
    }

    #[test]
    fn test_unintercepted_op_passes() {
        let enforcer = ExecutionEnforcer::new();
        let run = open_run();
        let policy = EnforcementPolicy::default()
            .with_intercepts(&[InterceptedOp::Subprocess])
            .with_protected_path("/srv/raw");
        let handle = enforcer.attach(&run, policy).expect("attach");
        let decision = handle
            .check_file_access(Path::new("/srv/raw/a.csv"), FileOp::Write)
            .expect("not intercepted");
        assert_eq!(decision, Decision::Allowed);
        assert_eq!(run.audit_len(), 0);
    }
}
