//! Deployment environments and the environment variables exported to children.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

pub const ENV_RUN_ID: &str = "LAB_RUN_ID";
pub const ENV_RUN_TOKEN: &str = "LAB_RUN_TOKEN";
pub const ENV_DIAG: &str = "LAB_DIAG";
pub const ENV_RULESET: &str = "LAB_RULESET";
pub const ENV_GIT_SHA: &str = "LAB_GIT_SHA";

/// Variables every managed child must see.
pub const REQUIRED_VARS: [&str; 4] = [ENV_RUN_ID, ENV_RUN_TOKEN, ENV_DIAG, ENV_RULESET];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabEnvironment {
    Test,
    Dev,
    Stage,
    Lab,
    Audit,
    Client,
}

impl LabEnvironment {
    pub fn as_str(self) -> &'static str {
        match self {
            LabEnvironment::Test => "test",
            LabEnvironment::Dev => "dev",
            LabEnvironment::Stage => "stage",
            LabEnvironment::Lab => "lab",
            LabEnvironment::Audit => "audit",
            LabEnvironment::Client => "client",
        }
    }
}

impl fmt::Display for LabEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LabEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(LabEnvironment::Test),
            "dev" => Ok(LabEnvironment::Dev),
            "stage" => Ok(LabEnvironment::Stage),
            "lab" => Ok(LabEnvironment::Lab),
            "audit" => Ok(LabEnvironment::Audit),
            "client" => Ok(LabEnvironment::Client),
            _ => Err(ConfigError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Names of required run variables missing from the current process.
///
/// Child scripts call this (through `lab check-env`) to confirm they were
/// launched by a governed run.
pub fn verify_run_environment() -> Vec<&'static str> {
    REQUIRED_VARS
        .iter()
        .copied()
        .filter(|name| std::env::var(name).map(|v| v.is_empty()).unwrap_or(true))
        .collect()
}

pub(crate) fn export(vars: &[(String, String)]) {
    for (name, value) in vars {
        std::env::set_var(name, value);
    }
}

/// Remove exported variables, but only while they still belong to `run_id`.
pub(crate) fn clear_if_owned(run_id: &str) {
    let owned = std::env::var(ENV_RUN_ID)
        .map(|v| v == run_id)
        .unwrap_or(false);
    if !owned {
        return;
    }
    for name in REQUIRED_VARS.iter().chain(std::iter::once(&ENV_GIT_SHA)) {
        std::env::remove_var(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!("LAB".parse::<LabEnvironment>().expect("lab"), LabEnvironment::Lab);
        match "prod".parse::<LabEnvironment>() {
            Err(ConfigError::UnknownEnvironment(name)) => assert_eq!(name, "prod"),
            other => panic!("expected UnknownEnvironment, got {:?}", other),
        }
    }
}
