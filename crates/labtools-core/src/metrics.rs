//! Process-wide governance counters.
//!
//! Counters are bumped at the call site; [`Metrics::flush`] emits them as one
//! `info!` record, typically when a run finalizes.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    audit_events: AtomicU64,
    policy_violations: AtomicU64,
    checks_executed: AtomicU64,
    check_retries: AtomicU64,
    scripts_executed: AtomicU64,
    runs_finalized: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            audit_events: AtomicU64::new(0),
            policy_violations: AtomicU64::new(0),
            checks_executed: AtomicU64::new(0),
            check_retries: AtomicU64::new(0),
            scripts_executed: AtomicU64::new(0),
            runs_finalized: AtomicU64::new(0),
        }
    }

    pub fn inc_audit_events(&self) {
        self.audit_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_policy_violations(&self) {
        self.policy_violations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "policy_violations", "counter incremented");
    }

    pub fn add_checks_executed(&self, n: u64) {
        self.checks_executed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_check_retries(&self) {
        self.check_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scripts_executed(&self) {
        self.scripts_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_runs_finalized(&self) {
        self.runs_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            audit_events = self.audit_events(),
            policy_violations = self.policy_violations(),
            checks_executed = self.checks_executed(),
            check_retries = self.check_retries(),
            scripts_executed = self.scripts_executed(),
            runs_finalized = self.runs_finalized(),
        );
    }

    pub fn audit_events(&self) -> u64 {
        self.audit_events.load(Ordering::Relaxed)
    }

    pub fn policy_violations(&self) -> u64 {
        self.policy_violations.load(Ordering::Relaxed)
    }

    pub fn checks_executed(&self) -> u64 {
        self.checks_executed.load(Ordering::Relaxed)
    }

    pub fn check_retries(&self) -> u64 {
        self.check_retries.load(Ordering::Relaxed)
    }

    pub fn scripts_executed(&self) -> u64 {
        self.scripts_executed.load(Ordering::Relaxed)
    }

    pub fn runs_finalized(&self) -> u64 {
        self.runs_finalized.load(Ordering::Relaxed)
    }
}
