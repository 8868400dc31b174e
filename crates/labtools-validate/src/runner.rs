//! Managed execution of discovered validation scripts.
//!
//! Scripts run concurrently up to `max_workers`, each as a child process that
//! receives the run environment plus its tier. One script failing never stops
//! its siblings; results come back in descriptor order.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use labtools_core::domain::validation::aggregate;
use labtools_core::domain::{AuditEvent, OutputRef, Tier, ValidationResult, ValidationStatus};
use labtools_core::enforcer::{EnforcerHandle, ExecutionEnforcer};
use labtools_core::obs;
use labtools_core::run_context::{CancelSignal, GateStage, RunContext};
use labtools_core::{ValidationConfig, METRICS};

use crate::discover::{discover, Discovery, ScriptDescriptor};
use crate::error::ValidationRunResult;

/// Tier of the running script, set alongside the run variables.
pub const ENV_VALIDATION_TIER: &str = "LAB_VALIDATION_TIER";

/// How long output pipes may stay open once a script has been killed.
const DRAIN_AFTER_KILL: Duration = Duration::from_millis(250);

pub struct ValidationRunner {
    config: ValidationConfig,
    enforcer: ExecutionEnforcer,
}

/// Everything a worker needs, shared across all scripts of one execution.
struct Launch {
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    cancel: CancelSignal,
    timeout: Duration,
    grace: Duration,
    log_dir: Option<PathBuf>,
    inline_limit: usize,
    retry_timeouts: bool,
    enforcer: Option<EnforcerHandle>,
}

enum Race {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    /// Exit status when the script stopped within the grace period.
    Cancelled(Option<ExitStatus>),
}

struct Attempt {
    status: ValidationStatus,
    exit_code: Option<i32>,
    text: String,
}

impl ValidationRunner {
    /// Runner checking spawns against the process-wide enforcer.
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            enforcer: ExecutionEnforcer::global().clone(),
        }
    }

    pub fn with_enforcer(mut self, enforcer: ExecutionEnforcer) -> Self {
        self.enforcer = enforcer;
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Discover scripts under the configured root.
    pub fn discover(&self) -> ValidationRunResult<Discovery> {
        discover(&self.config.root)
    }

    /// Discover then execute everything under the configured root.
    pub async fn validate(
        &self,
        run: &RunContext,
        tiers: Option<&[Tier]>,
    ) -> ValidationRunResult<Vec<ValidationResult>> {
        let scripts = self.discover()?.collect::<ValidationRunResult<Vec<_>>>()?;
        self.execute(run, scripts, tiers).await
    }

    /// Execute `scripts` as children of `run`, optionally restricted to `tiers`.
    ///
    /// Cancellation of the run stops queued scripts from starting. Running
    /// ones get SIGTERM and are killed if still alive after the grace period.
    pub async fn execute<I>(
        &self,
        run: &RunContext,
        scripts: I,
        tiers: Option<&[Tier]>,
    ) -> ValidationRunResult<Vec<ValidationResult>>
    where
        I: IntoIterator<Item = ScriptDescriptor>,
    {
        let scripts: Vec<ScriptDescriptor> = scripts
            .into_iter()
            .filter(|s| tiers.map_or(true, |t| t.contains(&s.tier)))
            .collect();
        let started = Instant::now();
        run.log_event(AuditEvent::checkpoint(
            "validation.started",
            json!({ "scripts": scripts.len(), "max_workers": self.config.max_workers }),
        ))?;

        let launch = Arc::new(self.launch(run));
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut workers = JoinSet::new();
        for (index, script) in scripts.iter().cloned().enumerate() {
            let launch = Arc::clone(&launch);
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = launch.cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return (index, ValidationResult::cancelled(script.tier, &script.script_id));
                };
                (index, run_script(&launch, &script).await)
            });
        }

        let mut slots: Vec<Option<ValidationResult>> = vec![None; scripts.len()];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "validation worker failed"),
            }
        }
        let results: Vec<ValidationResult> = slots
            .into_iter()
            .zip(&scripts)
            .map(|(slot, script)| {
                slot.unwrap_or_else(|| errored(script, "validation worker failed".to_string()))
            })
            .collect();

        for result in &results {
            run.log_event(AuditEvent::checkpoint(
                "validation.script",
                json!({
                    "tier": result.tier,
                    "script_id": result.script_id,
                    "status": result.status,
                    "exit_code": result.exit_code,
                    "duration_ms": result.duration_ms,
                    "attempts": result.attempts,
                }),
            ))?;
        }

        let summary = aggregate(&results);
        let duration_ms = started.elapsed().as_millis() as u64;
        run.ensure_stage(GateStage::Validated)?;
        run.log_event(AuditEvent::checkpoint(
            "validation.completed",
            json!({
                "overall": summary.overall(),
                "tiers": summary.tiers,
                "duration_ms": duration_ms,
            }),
        ))?;
        obs::emit_validation_completed(
            run.run_id(),
            results.len(),
            &summary.overall().to_string(),
            duration_ms,
        );
        Ok(results)
    }

    fn launch(&self, run: &RunContext) -> Launch {
        // Only the attachment bound to this run may judge its children.
        let enforcer = self
            .enforcer
            .current()
            .filter(|handle| handle.run_id() == run.run_id());
        Launch {
            env: run.env_vars(),
            cwd: Some(self.config.root.clone()).filter(|root| root.is_dir()),
            cancel: run.cancel_signal(),
            timeout: Duration::from_secs(self.config.timeout_secs),
            grace: Duration::from_millis(self.config.grace_period_ms),
            log_dir: self
                .config
                .output_dir
                .as_ref()
                .map(|dir| dir.join(run.run_id())),
            inline_limit: self.config.inline_output_limit,
            retry_timeouts: self.config.retry_timeouts,
            enforcer,
        }
    }
}

async fn run_script(launch: &Launch, script: &ScriptDescriptor) -> ValidationResult {
    METRICS.inc_scripts_executed();
    debug!(script = %script.script_id, tier = %script.tier, "starting validation script");
    let started = Instant::now();
    let max_attempts = if launch.retry_timeouts { 2 } else { 1 };

    let mut attempts = 0;
    let attempt = loop {
        attempts += 1;
        let attempt = run_once(launch, script).await;
        if attempt.status == ValidationStatus::Timeout && attempts < max_attempts {
            warn!(script = %script.script_id, "validation script timed out; retrying");
            continue;
        }
        break attempt;
    };

    let output = store_output(launch, script, &attempt.text).await;
    let result = ValidationResult {
        tier: script.tier,
        script_id: script.script_id.clone(),
        status: attempt.status,
        exit_code: attempt.exit_code,
        duration_ms: started.elapsed().as_millis() as u64,
        output,
        attempts,
    };
    info!(
        event = "validation.script",
        script = %result.script_id,
        tier = %result.tier,
        status = ?result.status,
        duration_ms = result.duration_ms,
    );
    result
}

async fn run_once(launch: &Launch, script: &ScriptDescriptor) -> Attempt {
    let mut cmd = match script.interpreter.program() {
        Some(program) => {
            let mut cmd = Command::new(program);
            cmd.arg(&script.path);
            cmd
        }
        None => Command::new(&script.path),
    };
    cmd.envs(launch.env.iter().map(|(k, v)| (k, v)))
        .env(ENV_VALIDATION_TIER, script.tier.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own group, so signals reach everything the script started.
    #[cfg(unix)]
    cmd.process_group(0);
    if let Some(cwd) = &launch.cwd {
        cmd.current_dir(cwd);
    }

    if let Some(handle) = &launch.enforcer {
        if let Err(e) = handle.authorize_command(cmd.as_std()) {
            return Attempt::error(format!("spawn refused: {e}"));
        }
    }
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return Attempt::error(format!("failed to start {}: {e}", script.path.display())),
    };
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let outcome = race(&mut child, launch).await;
    let bound = match outcome {
        Race::Exited(_) => None,
        _ => Some(DRAIN_AFTER_KILL),
    };
    let text = combined(&collect(stdout, bound).await, &collect(stderr, bound).await);

    match outcome {
        Race::Exited(Ok(status)) => match status.code() {
            Some(0) => Attempt {
                status: ValidationStatus::Pass,
                exit_code: Some(0),
                text,
            },
            // `None` when killed by a signal.
            code => Attempt {
                status: ValidationStatus::Fail,
                exit_code: code,
                text,
            },
        },
        Race::Exited(Err(e)) => Attempt::error(format!("failed to wait for script: {e}")),
        Race::TimedOut => Attempt {
            status: ValidationStatus::Timeout,
            exit_code: None,
            text: with_note(text, &format!("timed out after {}s", launch.timeout.as_secs())),
        },
        Race::Cancelled(status) => Attempt {
            status: ValidationStatus::Cancelled,
            exit_code: status.and_then(|s| s.code()),
            text: match status {
                Some(_) => with_note(text, "run cancelled"),
                None => with_note(text, "run cancelled; killed after grace period"),
            },
        },
    }
}

/// Wait for the child, its deadline or cancellation.
async fn race(child: &mut Child, launch: &Launch) -> Race {
    let pid = child.id();
    tokio::select! {
        status = child.wait() => Race::Exited(status),
        _ = tokio::time::sleep(launch.timeout) => {
            kill(child, pid).await;
            Race::TimedOut
        }
        _ = launch.cancel.cancelled() => {
            terminate(child, pid);
            match tokio::time::timeout(launch.grace, child.wait()).await {
                Ok(status) => {
                    // Sweep anything the script left behind in its group.
                    kill_group(pid);
                    Race::Cancelled(status.ok())
                }
                Err(_) => {
                    kill(child, pid).await;
                    Race::Cancelled(None)
                }
            }
        }
    }
}

#[cfg(unix)]
fn terminate(_child: &mut Child, pid: Option<u32>) {
    signal_group(pid, Signal::SIGTERM);
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _pid: Option<u32>) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "failed to stop validation script");
    }
}

async fn kill(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "validation script already gone");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap killed validation script");
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    signal_group(pid, Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// The script leads its own group, so the group id is its pid.
#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: Signal) {
    let Some(pid) = pid else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        debug!(pid, signal = ?signal, error = %e, "failed to signal script process group");
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!(error = %e, "script output stream closed early");
            }
        }
        buf
    })
}

/// Join a pipe reader, giving up after `bound` when one is set.
async fn collect(mut reader: JoinHandle<Vec<u8>>, bound: Option<Duration>) -> Vec<u8> {
    let joined = match bound {
        None => (&mut reader).await,
        Some(bound) => match tokio::time::timeout(bound, &mut reader).await {
            Ok(joined) => joined,
            Err(_) => {
                reader.abort();
                return Vec::new();
            }
        },
    };
    joined.unwrap_or_default()
}

impl Attempt {
    fn error(text: String) -> Self {
        Self {
            status: ValidationStatus::Error,
            exit_code: None,
            text,
        }
    }
}

fn errored(script: &ScriptDescriptor, text: String) -> ValidationResult {
    ValidationResult {
        tier: script.tier,
        script_id: script.script_id.clone(),
        status: ValidationStatus::Error,
        exit_code: None,
        duration_ms: 0,
        output: OutputRef::Inline { text },
        attempts: 0,
    }
}

fn combined(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("--- stderr ---\n");
        text.push_str(&String::from_utf8_lossy(stderr));
    }
    text
}

fn with_note(mut text: String, note: &str) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&format!("--- {note} ---\n"));
    text
}

/// Write to the log directory when configured, otherwise keep the tail inline.
async fn store_output(launch: &Launch, script: &ScriptDescriptor, text: &str) -> OutputRef {
    if let Some(dir) = &launch.log_dir {
        let path = log_path(dir, &script.script_id);
        match write_log(&path, text).await {
            Ok(()) => return OutputRef::File { path },
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "failed to write script output; keeping it inline"
            ),
        }
    }
    OutputRef::Inline {
        text: tail(text, launch.inline_limit),
    }
}

fn log_path(dir: &Path, script_id: &str) -> PathBuf {
    dir.join(format!("{script_id}.log"))
}

async fn write_log(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, text).await
}

/// Last `limit` bytes of `text`, cut on a char boundary.
fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[{start} bytes truncated]\n{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_short_output() {
        assert_eq!(tail("ok\n", 16), "ok\n");
    }

    #[test]
    fn test_tail_keeps_the_end() {
        let text = format!("{}END", "x".repeat(100));
        let kept = tail(&text, 10);
        assert!(kept.starts_with("[93 bytes truncated]"));
        assert!(kept.ends_with("xxxxxxxEND"));
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        // 'é' is two bytes; a cut inside it moves forward.
        let text = "ééé";
        let kept = tail(text, 3);
        assert!(kept.ends_with("é"));
        assert!(kept.starts_with("[4 bytes truncated]"));
    }

    #[test]
    fn test_combined_marks_stderr() {
        assert_eq!(
            combined(b"rows ok", b"warning: slow"),
            "rows ok\n--- stderr ---\nwarning: slow"
        );
        assert_eq!(combined(b"rows ok\n", b""), "rows ok\n");
    }

    #[test]
    fn test_note_starts_on_its_own_line() {
        assert_eq!(with_note(String::new(), "run cancelled"), "--- run cancelled ---\n");
        assert_eq!(
            with_note("partial".to_string(), "timed out after 2s"),
            "partial\n--- timed out after 2s ---\n"
        );
    }

    #[test]
    fn test_log_path_mirrors_script_id() {
        let path = log_path(Path::new("/tmp/out/run-1"), "integration/joins/test_join.sh");
        assert_eq!(
            path,
            PathBuf::from("/tmp/out/run-1/integration/joins/test_join.sh.log")
        );
    }
}
