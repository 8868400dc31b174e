//! Lazy, restartable discovery of validation scripts.
//!
//! Layout: `<root>/<tier>/**/<script>`. The tier is the first directory below
//! the root. Files directly under the root, unknown tier directories and
//! names starting with `_` or `.` are skipped. Directories are read only as
//! the iterator reaches them, in name order.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use labtools_core::domain::Tier;

use crate::error::{ValidationRunError, ValidationRunResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpreter {
    /// `*.sh`, run via `sh`.
    Shell,
    /// `*.py`, run via `python3`.
    Python,
    /// Any other file with an executable bit, run directly.
    Executable,
}

impl Interpreter {
    /// Program used to launch the script, `None` for direct execution.
    pub fn program(self) -> Option<&'static str> {
        match self {
            Interpreter::Shell => Some("sh"),
            Interpreter::Python => Some("python3"),
            Interpreter::Executable => None,
        }
    }

    fn for_file(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("sh") => Some(Interpreter::Shell),
            Some("py") => Some(Interpreter::Python),
            _ if is_executable(path) => Some(Interpreter::Executable),
            _ => None,
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

/// One validation script found under the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    pub tier: Tier,
    /// Path relative to the root, `/`-separated. Unique within a root.
    pub script_id: String,
    /// Absolute path to the script.
    pub path: PathBuf,
    pub interpreter: Interpreter,
}

enum Pending {
    Dir { path: PathBuf, tier: Option<Tier> },
    Script(ScriptDescriptor),
}

/// Depth-first walk over a validation root.
pub struct Discovery {
    root: PathBuf,
    stack: Vec<Pending>,
}

/// Start discovering scripts under `root`.
pub fn discover(root: impl AsRef<Path>) -> ValidationRunResult<Discovery> {
    Discovery::new(root)
}

fn skipped(name: &str) -> bool {
    name.starts_with('_') || name.starts_with('.')
}

impl Discovery {
    pub fn new(root: impl AsRef<Path>) -> ValidationRunResult<Self> {
        let root = root.as_ref();
        let root = fs::canonicalize(root)
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| ValidationRunError::MissingRoot(root.to_path_buf()))?;
        let mut discovery = Self {
            root,
            stack: Vec::new(),
        };
        discovery.restart();
        Ok(discovery)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rewind to the beginning. The next iteration re-reads the filesystem.
    pub fn restart(&mut self) {
        self.stack.clear();
        self.stack.push(Pending::Dir {
            path: self.root.clone(),
            tier: None,
        });
    }

    fn script_id(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn expand(&mut self, dir: &Path, tier: Option<Tier>) -> ValidationRunResult<()> {
        let read = |e: std::io::Error| ValidationRunError::Unreadable {
            path: dir.to_path_buf(),
            source: e,
        };
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(read)? {
            let entry = entry.map_err(read)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if skipped(&name) {
                continue;
            }
            // `file_type` does not follow symlinks.
            let file_type = entry.file_type().map_err(read)?;
            let path = entry.path();
            if file_type.is_symlink() && path.is_dir() {
                debug!(dir = %path.display(), "symlinked directory; skipped");
                continue;
            }
            entries.push((name, path, file_type.is_dir()));
        }
        entries.sort();

        // Reverse so the first name is popped first.
        for (name, path, is_dir) in entries.into_iter().rev() {
            if is_dir {
                let tier = match tier {
                    Some(tier) => tier,
                    None => match name.parse::<Tier>() {
                        Ok(tier) => tier,
                        Err(_) => {
                            debug!(dir = %path.display(), "not a validation tier; skipped");
                            continue;
                        }
                    },
                };
                self.stack.push(Pending::Dir {
                    path,
                    tier: Some(tier),
                });
                continue;
            }
            let Some(tier) = tier else {
                debug!(file = %path.display(), "file outside a tier directory; skipped");
                continue;
            };
            match Interpreter::for_file(&path) {
                Some(interpreter) => {
                    let script_id = self.script_id(&path);
                    self.stack.push(Pending::Script(ScriptDescriptor {
                        tier,
                        script_id,
                        path,
                        interpreter,
                    }));
                }
                None => debug!(file = %path.display(), "not a runnable script; skipped"),
            }
        }
        Ok(())
    }
}

impl Iterator for Discovery {
    type Item = ValidationRunResult<ScriptDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stack.pop()? {
                Pending::Script(script) => return Some(Ok(script)),
                Pending::Dir { path, tier } => {
                    if let Err(e) = self.expand(&path, tier) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}
