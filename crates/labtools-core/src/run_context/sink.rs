//! Durable destinations for a run's audit stream and final summary.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;

use crate::domain::audit::AuditEvent;
use crate::run_context::context::RunSummary;

/// Receives every audit event as it is appended, then the closing summary.
///
/// `append` is called while the run's ledger lock is held, so implementations
/// see events in sequence order.
pub trait AuditSink: Send + Sync {
    fn append(&self, run_id: &str, event: &AuditEvent) -> io::Result<()>;

    /// Persist the final summary. Called once per run, on finalize or corruption.
    fn flush(&self, summary: &RunSummary) -> io::Result<()>;
}

/// Writes `<root>/<run_id>/audit_log.jsonl` incrementally and, on flush,
/// `run_summary.json` plus `artifact_manifest.json` next to it.
#[derive(Debug, Clone)]
pub struct JsonlAuditSink {
    root: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    pub fn audit_log_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("audit_log.jsonl")
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(name)).map_err(|e| e.error)?;
    Ok(())
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, run_id: &str, event: &AuditEvent) -> io::Result<()> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir)?;
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("audit_log.jsonl"))?;
        file.write_all(&line)?;
        file.flush()
    }

    fn flush(&self, summary: &RunSummary) -> io::Result<()> {
        let dir = self.run_dir(&summary.run_id);
        fs::create_dir_all(&dir)?;
        write_atomic(&dir, "run_summary.json", &serde_json::to_vec_pretty(summary)?)?;
        let manifest = serde_json::json!({
            "run_id": summary.run_id,
            "artifacts": summary.artifacts,
        });
        write_atomic(&dir, "artifact_manifest.json", &serde_json::to_vec_pretty(&manifest)?)?;
        Ok(())
    }
}

/// In-memory sink for tests and embedded use. Can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<HashMap<String, Vec<AuditEvent>>>,
    summaries: Mutex<Vec<RunSummary>>,
    fail_appends_after: Mutex<Option<usize>>,
    fail_flush: Mutex<bool>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` more appends, then fail every subsequent one.
    pub fn fail_appends_after(&self, n: usize) {
        *self.fail_appends_after.lock().unwrap_or_else(|e| e.into_inner()) = Some(n);
    }

    pub fn fail_flushes(&self) {
        *self.fail_flush.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn events(&self, run_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, run_id: &str, event: &AuditEvent) -> io::Result<()> {
        {
            let mut budget = self.fail_appends_after.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(io::Error::new(io::ErrorKind::Other, "injected audit sink failure"));
                }
                *remaining -= 1;
            }
        }
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(run_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    fn flush(&self, summary: &RunSummary) -> io::Result<()> {
        if *self.fail_flush.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected flush failure"));
        }
        self.summaries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::{AuditKind, Decision};

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = JsonlAuditSink::new(dir.path());
        for i in 0..3 {
            let mut event = AuditEvent::new(
                AuditKind::Checkpoint,
                Decision::Allowed,
                serde_json::json!({ "i": i }),
            );
            event.seq = i;
            sink.append("run-a", &event).expect("append");
        }
        let text = std::fs::read_to_string(sink.audit_log_path("run-a")).expect("read log");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: AuditEvent = serde_json::from_str(lines[2]).expect("parse line");
        assert_eq!(last.seq, 2);
    }

    #[test]
    fn test_memory_sink_failure_budget() {
        let sink = MemoryAuditSink::new();
        sink.fail_appends_after(1);
        let event = AuditEvent::checkpoint("x", serde_json::Value::Null);
        assert!(sink.append("r", &event).is_ok());
        assert!(sink.append("r", &event).is_err());
        assert_eq!(sink.events("r").len(), 1);
    }
}
