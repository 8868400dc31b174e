//! `lab.toml`: one file configuring every stage of a governed run.
//!
//! Every section has defaults, so an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticsConfig, Ruleset};
use crate::domain::error::ConfigError;
use crate::domain::level::DiagnosticsLevel;
use crate::enforcer::{CompiledRuleSet, EnforcementPolicy};
use crate::reporter::ReportPolicy;
use crate::run_context::{JsonlAuditSink, LabEnvironment, RunOptions};

pub const DEFAULT_CONFIG_FILE: &str = "lab.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Root of the per-run audit directories.
    pub log_dir: PathBuf,
    pub environment: Option<LabEnvironment>,
    pub default_level: DiagnosticsLevel,
    pub export_env: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs/runs"),
            environment: None,
            default_level: DiagnosticsLevel::default(),
            export_env: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub root: PathBuf,
    pub timeout_secs: u64,
    pub max_workers: usize,
    /// Retry a timed-out script once.
    pub retry_timeouts: bool,
    /// How long a cancelled script may keep running before it is killed.
    pub grace_period_ms: u64,
    /// When set, script output goes to `<output_dir>/<run_id>/<script>.log`.
    pub output_dir: Option<PathBuf>,
    /// Bytes of output kept inline when there is no output dir.
    pub inline_output_limit: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("validation"),
            timeout_secs: 600,
            max_workers: 4,
            retry_timeouts: false,
            grace_period_ms: 5_000,
            output_dir: None,
            inline_output_limit: 4_096,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub run: RunSection,
    pub enforcement: EnforcementPolicy,
    pub diagnostics: DiagnosticsConfig,
    pub rulesets: BTreeMap<String, Ruleset>,
    pub validation: ValidationConfig,
    pub report: ReportPolicy,
}

impl GovernanceConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load `path` when it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: GovernanceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject what would otherwise fail mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        CompiledRuleSet::compile(&self.enforcement.throwaway_rules)?;
        for pattern in &self.diagnostics.pii_patterns {
            Regex::new(&pattern.pattern).map_err(|e| ConfigError::InvalidRule {
                rule_id: pattern.id.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(level) = self.report.required_level {
            DiagnosticsLevel::try_from(level)?;
        }
        if self.validation.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "validation.max_workers must be at least 1".to_string(),
            ));
        }
        if self.validation.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "validation.timeout_secs must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.diagnostics.null_rate_delta) {
            return Err(ConfigError::Invalid(
                "diagnostics.null_rate_delta must be within 0..=1".to_string(),
            ));
        }
        for (id, ruleset) in &self.rulesets {
            if let Some(rule) = ruleset.rules.iter().find(|r| r.id.trim().is_empty()) {
                return Err(ConfigError::InvalidRule {
                    rule_id: format!("{id}/{}", rule.dataset),
                    reason: "rule id must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolve the requested environment, falling back to `[run].environment`.
    pub fn environment(&self, requested: Option<&str>) -> Result<LabEnvironment, ConfigError> {
        match requested {
            Some(name) => name.parse(),
            None => self.run.environment.ok_or_else(|| {
                ConfigError::Invalid("no environment given and [run].environment unset".to_string())
            }),
        }
    }

    /// Run options writing the audit trail under `[run].log_dir`.
    ///
    /// When rulesets are configured, the run's ruleset must be one of them.
    pub fn run_options(&self, level: Option<u8>) -> Result<RunOptions, ConfigError> {
        let level = match level {
            Some(l) => DiagnosticsLevel::try_from(l)?,
            None => self.run.default_level,
        };
        let mut options = RunOptions::default()
            .with_level(level)
            .with_sink(Arc::new(JsonlAuditSink::new(self.run.log_dir.clone())));
        if !self.run.export_env {
            options = options.without_env_export();
        }
        if !self.rulesets.is_empty() {
            options = options.with_known_rulesets(self.rulesets.keys().cloned());
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RuleCheck;
    use crate::enforcer::{InterceptedOp, Strictness};

    #[test]
    fn test_empty_file_is_valid() {
        let config = GovernanceConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, GovernanceConfig::default());
        assert_eq!(config.run.default_level, DiagnosticsLevel::MATH_INTEGRITY);
        assert_eq!(config.enforcement.strictness, Strictness::Block);
    }

    #[test]
    fn test_full_file_parses() {
        let config = GovernanceConfig::from_toml_str(
            r#"
            [run]
            log_dir = "/tmp/lab/logs"
            environment = "stage"
            default_level = 5

            [enforcement]
            strictness = "warn"
            intercept = ["subprocess"]
            protected_paths = ["/data/raw"]

            [diagnostics]
            rounding_places = 4
            [diagnostics.required]
            sales = ["region", "amount"]

            [rulesets.finance]
            description = "finance gate"
            [[rulesets.finance.rules]]
            id = "sales_not_tiny"
            dataset = "sales"
            check = { kind = "min_row_count", min = 10 }

            [validation]
            timeout_secs = 30
            max_workers = 2

            [report]
            required_level = 5
            "#,
        )
        .expect("parse");
        assert_eq!(config.run.environment, Some(LabEnvironment::Stage));
        assert_eq!(config.run.default_level.value(), 5);
        assert_eq!(config.enforcement.strictness, Strictness::Warn);
        assert!(config.enforcement.intercepts(InterceptedOp::Subprocess));
        assert!(!config.enforcement.intercepts(InterceptedOp::FileRead));
        assert_eq!(config.diagnostics.required["sales"], vec!["region", "amount"]);
        let rule = &config.rulesets["finance"].rules[0];
        assert_eq!(rule.check, RuleCheck::MinRowCount { min: 10 });
        assert_eq!(config.validation.max_workers, 2);
        assert_eq!(config.validation.grace_period_ms, 5_000);
        assert_eq!(config.report.required_level, Some(5));
    }

    #[test]
    fn test_out_of_range_level_rejected() {
        let err = GovernanceConfig::from_toml_str("[run]\ndefault_level = 12\n").expect_err("level 12");
        match err {
            ConfigError::Parse(e) => assert!(e.to_string().contains("12")),
            other => panic!("expected Parse, got {:?}", other),
        }

        let err = GovernanceConfig::from_toml_str("[report]\nrequired_level = 10\n").expect_err("level 10");
        assert!(matches!(err, ConfigError::InvalidLevel(10)));
    }

    #[test]
    fn test_bad_rule_regex_rejected() {
        let err = GovernanceConfig::from_toml_str(
            r#"
            [[enforcement.throwaway_rules]]
            id = "broken"
            pattern = "("
            description = "unbalanced group"
            severity = "error"
            "#,
        )
        .expect_err("bad regex");
        match err {
            ConfigError::InvalidRule { rule_id, .. } => assert_eq!(rule_id, "broken"),
            other => panic!("expected InvalidRule, got {:?}", other),
        }
    }

    #[test]
    fn test_environment_resolution() {
        let config = GovernanceConfig::default();
        assert_eq!(config.environment(Some("lab")).expect("lab"), LabEnvironment::Lab);
        assert!(matches!(
            config.environment(Some("prod")),
            Err(ConfigError::UnknownEnvironment(_))
        ));
        assert!(matches!(config.environment(None), Err(ConfigError::Invalid(_))));
    }
}
