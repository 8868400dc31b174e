//! Enforcement policy: what is intercepted and how violations are handled.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::rules::{Severity, ThrowawayRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Violations are refused.
    #[default]
    Block,
    /// Violations are logged and allowed.
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptedOp {
    Subprocess,
    FileRead,
    FileWrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementPolicy {
    pub strictness: Strictness,
    pub intercept: BTreeSet<InterceptedOp>,
    /// Paths no managed code may touch, unless carved out by `allowed_paths`.
    pub protected_paths: Vec<PathBuf>,
    pub allowed_paths: Vec<PathBuf>,
    pub throwaway_rules: Vec<ThrowawayRule>,
    /// Pattern matches at or above this severity are violations.
    pub block_severity: Severity,
    /// Cancel the run on the first violation.
    pub fatal: bool,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            strictness: Strictness::Block,
            intercept: [
                InterceptedOp::Subprocess,
                InterceptedOp::FileRead,
                InterceptedOp::FileWrite,
            ]
            .into_iter()
            .collect(),
            protected_paths: Vec::new(),
            allowed_paths: Vec::new(),
            throwaway_rules: ThrowawayRule::defaults(),
            block_severity: Severity::Warning,
            fatal: false,
        }
    }
}

impl EnforcementPolicy {
    pub fn warn_only(mut self) -> Self {
        self.strictness = Strictness::Warn;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn with_protected_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.protected_paths.push(path.into());
        self
    }

    pub fn with_allowed_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.allowed_paths.push(path.into());
        self
    }

    pub fn with_rules(mut self, rules: Vec<ThrowawayRule>) -> Self {
        self.throwaway_rules = rules;
        self
    }

    pub fn with_intercepts(mut self, ops: &[InterceptedOp]) -> Self {
        self.intercept = ops.iter().copied().collect();
        self
    }

    pub fn intercepts(&self, op: InterceptedOp) -> bool {
        self.intercept.contains(&op)
    }

    pub fn is_blocking(&self) -> bool {
        self.strictness == Strictness::Block
    }

    /// Whether `path` falls under a protected root and no allowed carve-out.
    pub fn protects(&self, path: &Path) -> bool {
        let path = normalize(path);
        let under = |roots: &[PathBuf]| roots.iter().any(|root| path.starts_with(normalize(root)));
        under(&self.protected_paths) && !under(&self.allowed_paths)
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
