//! Level-9 evidence packages: a sealed, replayable record of the diagnostics.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::digest::{canonicalize, sha256_hex};
use crate::domain::error::DigestError;
use crate::domain::evidence::{aggregate, CheckResult, CheckStatus};

pub const PACKAGE_FORMAT: u32 = 1;

/// Float precision used when digesting, so packages re-read from disk verify.
const DIGEST_PLACES: u32 = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePackage {
    pub format: u32,
    pub run_id: String,
    pub project: String,
    pub ruleset: String,
    pub code_version: String,
    pub requested_level: u8,
    /// Dataset name to content fingerprint.
    pub inputs: BTreeMap<String, String>,
    pub checks: Vec<CheckResult>,
    pub status: CheckStatus,
    #[serde(default)]
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub digest_matches: bool,
    pub status_matches: bool,
    pub recomputed_status: CheckStatus,
}

impl ReplayOutcome {
    pub fn verified(&self) -> bool {
        self.digest_matches && self.status_matches
    }
}

impl EvidencePackage {
    /// Build and seal a package over `checks`.
    pub fn seal(
        run_id: &str,
        project: &str,
        ruleset: &str,
        code_version: &str,
        requested_level: u8,
        inputs: BTreeMap<String, String>,
        checks: Vec<CheckResult>,
    ) -> Result<Self, DigestError> {
        let mut package = Self {
            format: PACKAGE_FORMAT,
            run_id: run_id.to_string(),
            project: project.to_string(),
            ruleset: ruleset.to_string(),
            code_version: code_version.to_string(),
            requested_level,
            inputs,
            status: aggregate(&checks),
            checks,
            digest: String::new(),
        };
        package.digest = package.compute_digest()?;
        Ok(package)
    }

    fn compute_digest(&self) -> Result<String, DigestError> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("digest");
        }
        let canonical = canonicalize(&value, Some(DIGEST_PLACES))?;
        Ok(sha256_hex(serde_json::to_string(&canonical)?.as_bytes()))
    }

    /// Re-derive the digest and aggregate status from the packaged checks.
    pub fn replay(&self) -> Result<ReplayOutcome, DigestError> {
        let recomputed_status = aggregate(&self.checks);
        Ok(ReplayOutcome {
            digest_matches: self.compute_digest()? == self.digest,
            status_matches: recomputed_status == self.status,
            recomputed_status,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), DigestError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(self)?)?;
        tmp.persist(path).map_err(|e| DigestError::Io(e.error))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, DigestError> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }
}
