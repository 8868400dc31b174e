//! Execution enforcement against a live run: every decision is audited first.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use labtools_core::domain::{AuditKind, Decision};
use labtools_core::enforcer::{
    EnforcementPolicy, EnforcerError, ExecutionEnforcer, FileOp, InterceptedOp, SpawnRequest,
    ViolationKind,
};
use labtools_core::run_context::environment::ENV_RUN_TOKEN;
use labtools_core::run_context::{MemoryAuditSink, RunContext, RunOptions};

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

fn events_of(run: &RunContext, kind: AuditKind) -> Vec<labtools_core::AuditEvent> {
    run.audit_log().into_iter().filter(|e| e.kind == kind).collect()
}

// -------------------------------------------------------------------------
// subprocesses
// -------------------------------------------------------------------------

#[test]
fn test_block_unmanaged_subprocess_logs_exactly_one_event() {
    let run = open();
    let enforcer = ExecutionEnforcer::new();
    let handle = enforcer
        .attach(&run, EnforcementPolicy::default())
        .expect("attach");

    let request = SpawnRequest::new("python3", ["ad_hoc.py"]).without_token();
    match handle.check_subprocess(&request) {
        Err(EnforcerError::Violation(v)) => assert_eq!(v.kind, ViolationKind::UnmanagedSubprocess),
        other => panic!("expected PolicyViolation, got {:?}", other),
    }

    let attempts = events_of(&run, AuditKind::SubprocessAttempt);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].decision, Decision::Blocked);
    assert_eq!(attempts[0].payload["classification"], "missing_token");
    handle.detach();
}

#[test]
fn test_managed_subprocess_allowed_and_audited() {
    let run = open();
    let enforcer = ExecutionEnforcer::new();
    let handle = enforcer
        .attach(&run, EnforcementPolicy::default())
        .expect("attach");

    let request = SpawnRequest::new("sh", ["validate.sh"]).with_token(run.run_token());
    assert_eq!(handle.check_subprocess(&request).expect("allowed"), Decision::Allowed);

    let wrong = SpawnRequest::new("sh", ["validate.sh"]).with_token("lab_forged");
    assert!(handle.check_subprocess(&wrong).is_err());

    let attempts = events_of(&run, AuditKind::SubprocessAttempt);
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].decision, Decision::Allowed);
    assert_eq!(attempts[1].payload["classification"], "token_mismatch");
}

#[test]
fn test_spawn_refuses_command_with_token_removed() {
    let run = open();
    let enforcer = ExecutionEnforcer::new();
    let handle = enforcer
        .attach(&run, EnforcementPolicy::default())
        .expect("attach");

    let mut cmd = Command::new("true");
    cmd.env_remove(ENV_RUN_TOKEN);
    assert!(matches!(
        handle.spawn(&mut cmd),
        Err(EnforcerError::Violation(_))
    ));
    assert_eq!(events_of(&run, AuditKind::SubprocessAttempt).len(), 1);
}

#[test]
fn test_warn_mode_allows_but_records_violation() {
    let run = open();
    let enforcer = ExecutionEnforcer::new();
    let handle = enforcer
        .attach(&run, EnforcementPolicy::default().warn_only())
        .expect("attach");

    let request = SpawnRequest::new("curl", ["https://example.org"]).without_token();
    assert_eq!(handle.check_subprocess(&request).expect("warn"), Decision::Allowed);

    let attempts = events_of(&run, AuditKind::SubprocessAttempt);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].decision, Decision::Allowed);
    assert_eq!(attempts[0].payload["violation"], true);
}

#[test]
fn test_intercept_set_is_configurable() {
    let run = open();
    let enforcer = ExecutionEnforcer::new();
    let handle = enforcer
        .attach(
            &run,
            EnforcementPolicy::default().with_intercepts(&[InterceptedOp::FileRead]),
        )
        .expect("attach");

    let request = SpawnRequest::new("python3", ["x.py"]).without_token();
    assert_eq!(handle.check_subprocess(&request).expect("not intercepted"), Decision::Allowed);
    assert_eq!(run.audit_len(), 0);
}

#[test]
fn test_fatal_violation_cancels_run() {
    let run = open();
    let enforcer = ExecutionEnforcer::new();
    let handle = enforcer
        .attach(&run, EnforcementPolicy::default().fatal())
        .expect("attach");

    let request = SpawnRequest::new("python3", ["x.py"]).without_token();
    assert!(handle.check_subprocess(&request).is_err());
    assert!(run.is_cancelled());
    let summary = run.finalize().expect("finalize");
    assert!(summary.cancelled);
}

// -------------------------------------------------------------------------
// attach / detach
// -------------------------------------------------------------------------

#[test]
fn test_attach_twice_fails_and_detach_is_idempotent() {
    let run = open();
    let other = open();
    let enforcer = ExecutionEnforcer::new();
    let handle = enforcer
        .attach(&run, EnforcementPolicy::default())
        .expect("attach");

    match enforcer.attach(&other, EnforcementPolicy::default()) {
        Err(EnforcerError::AlreadyAttached { run_id }) => assert_eq!(run_id, run.run_id()),
        other => panic!("expected AlreadyAttached, got {:?}", other),
    }

    handle.detach();
    handle.detach();
    enforcer.detach();
    assert!(!enforcer.is_attached());
    assert!(!handle.is_active());

    let again = enforcer
        .attach(&other, EnforcementPolicy::default())
        .expect("attach after detach");
    assert_eq!(again.run_id(), other.run_id());
}

#[test]
fn test_concurrent_attach_has_single_winner() {
    let enforcer = ExecutionEnforcer::new();
    let runs: Vec<Arc<RunContext>> = (0..8).map(|_| Arc::new(open())).collect();
    let threads: Vec<_> = runs
        .iter()
        .map(|run| {
            let enforcer = enforcer.clone();
            let run = Arc::clone(run);
            std::thread::spawn(move || enforcer.attach(&run, EnforcementPolicy::default()).is_ok())
        })
        .collect();
    let winners = threads
        .into_iter()
        .map(|t| t.join().expect("join"))
        .filter(|ok| *ok)
        .count();
    assert_eq!(winners, 1);
}

// -------------------------------------------------------------------------
// protected paths and throwaway patterns
// -------------------------------------------------------------------------

#[test]
fn test_protected_path_with_allowed_carve_out() {
    let run = open();
    let enforcer = ExecutionEnforcer::new();
    let policy = EnforcementPolicy::default()
        .with_protected_path("/data/raw")
        .with_allowed_path("/data/raw/public");
    let handle = enforcer.attach(&run, policy).expect("attach");

    match handle.check_file_access(Path::new("/data/raw/../raw/secret.csv"), FileOp::Read) {
        Err(EnforcerError::Violation(v)) => assert_eq!(v.kind, ViolationKind::ProtectedPathAccess),
        other => panic!("expected PolicyViolation, got {:?}", other),
    }
    assert_eq!(
        handle
            .check_file_access(Path::new("/data/raw/public/lookup.csv"), FileOp::Read)
            .expect("carve-out"),
        Decision::Allowed
    );
    assert_eq!(
        handle
            .check_file_access(Path::new("/tmp/scratch.csv"), FileOp::Write)
            .expect("unprotected"),
        Decision::Allowed
    );

    let access = events_of(&run, AuditKind::FileAccess);
    assert_eq!(access.len(), 2, "unprotected paths are not audited");
    assert_eq!(access[0].decision, Decision::Blocked);
    assert_eq!(access[0].payload["path"], "/data/raw/secret.csv");
    assert_eq!(access[1].decision, Decision::Allowed);
}

#[test]
fn test_throwaway_scan_blocks_at_threshold() {
    let run = open();
    let enforcer = ExecutionEnforcer::new();
    let handle = enforcer
        .attach(&run, EnforcementPolicy::default())
        .expect("attach");

    let clean = "def total(xs):\n    # TODO: vectorize\n    return sum(xs)\n";
    let matches = handle.scan_source("clean.py", clean).expect("info only");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].rule_id, "todo_marker");

    let scratch = "import os\nprint(df.head())\nresult = eval(expr)\n";
    match handle.scan_source("scratch.py", scratch) {
        Err(EnforcerError::Violation(v)) => {
            assert_eq!(v.kind, ViolationKind::ThrowawayPattern);
            let ids: Vec<&str> = v.matches.iter().map(|m| m.rule_id.as_str()).collect();
            assert!(ids.contains(&"debug_print"));
            assert!(ids.contains(&"dynamic_exec"));
        }
        other => panic!("expected PolicyViolation, got {:?}", other),
    }

    let logged = events_of(&run, AuditKind::PolicyViolation);
    assert_eq!(logged.len(), 3);
    assert_eq!(logged[0].decision, Decision::Allowed);
    assert!(logged[1..].iter().all(|e| e.is_blocked()));
}
