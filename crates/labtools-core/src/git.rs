//! Code-version capture for provenance.

use std::path::Path;
use std::process::Command;

/// Placeholder recorded when no code version can be determined.
pub const UNKNOWN_VERSION: &str = "unknown";

/// `git rev-parse HEAD` in `repo_dir`, or `None` outside a repository or
/// when git is unavailable.
pub fn capture_head_sha(repo_dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::debug!(
            dir = %repo_dir.display(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git rev-parse HEAD failed"
        );
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

/// Resolve the code version for a run: explicit override, then `GIT_SHA` from
/// the environment, then the working tree's HEAD, then [`UNKNOWN_VERSION`].
pub fn resolve_code_version(explicit: Option<&str>, repo_dir: &Path) -> String {
    if let Some(v) = explicit.filter(|v| !v.trim().is_empty()) {
        return v.trim().to_string();
    }
    if let Ok(v) = std::env::var("GIT_SHA") {
        if !v.trim().is_empty() {
            return v.trim().to_string();
        }
    }
    capture_head_sha(repo_dir).unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}
