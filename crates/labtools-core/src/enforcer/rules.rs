//! Throwaway-code pattern rules and their compiled form.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// `Forbidden` rules fire when the pattern appears; `Required` rules fire
/// when it is absent from the whole source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMode {
    #[default]
    Forbidden,
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowawayRule {
    pub id: String,
    pub pattern: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub mode: RuleMode,
}

impl ThrowawayRule {
    pub fn forbidden(id: &str, pattern: &str, description: &str, severity: Severity) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            description: description.to_string(),
            severity,
            mode: RuleMode::Forbidden,
        }
    }

    pub fn required(id: &str, pattern: &str, description: &str, severity: Severity) -> Self {
        Self {
            mode: RuleMode::Required,
            ..Self::forbidden(id, pattern, description, severity)
        }
    }

    /// Patterns for scratch code that must not ship.
    pub fn defaults() -> Vec<ThrowawayRule> {
        vec![
            Self::forbidden(
                "debug_print",
                r"(^|[^\w.])(print|console\.log|dbg!)\s*\(",
                "ad-hoc debug print",
                Severity::Warning,
            ),
            Self::forbidden(
                "dynamic_exec",
                r"(^|[^\w.])(eval|exec)\s*\(",
                "direct execution of an arbitrary string",
                Severity::Error,
            ),
            Self::forbidden(
                "shell_string",
                r"os\.system\s*\(|shell\s*=\s*True",
                "shell command built from a string",
                Severity::Error,
            ),
            Self::forbidden(
                "wildcard_import",
                r"(?m)^\s*from\s+\S+\s+import\s+\*",
                "wildcard import",
                Severity::Warning,
            ),
            Self::forbidden(
                "scope_introspection",
                r"\b(globals|locals)\s*\(\s*\)",
                "scope introspection",
                Severity::Warning,
            ),
            Self::forbidden(
                "todo_marker",
                r"\b(TODO|FIXME|XXX)\b",
                "unresolved work marker",
                Severity::Info,
            ),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub rule_id: String,
    pub severity: Severity,
    pub description: String,
    /// 1-based line of the match. `None` for a missing required pattern.
    pub line: Option<usize>,
    pub excerpt: String,
}

#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    rules: Vec<(ThrowawayRule, Regex)>,
}

impl CompiledRuleSet {
    pub fn compile(rules: &[ThrowawayRule]) -> Result<Self, ConfigError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (rule.clone(), re))
                    .map_err(|e| ConfigError::InvalidRule {
                        rule_id: rule.id.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Matches in line order, one per (rule, line).
    pub fn scan(&self, source: &str) -> Vec<PatternMatch> {
        let mut matches = Vec::new();
        for (rule, re) in &self.rules {
            match rule.mode {
                RuleMode::Forbidden => {
                    for (idx, line) in source.lines().enumerate() {
                        if re.is_match(line) {
                            matches.push(PatternMatch {
                                rule_id: rule.id.clone(),
                                severity: rule.severity,
                                description: rule.description.clone(),
                                line: Some(idx + 1),
                                excerpt: line.trim().chars().take(120).collect(),
                            });
                        }
                    }
                }
                RuleMode::Required => {
                    if !re.is_match(source) {
                        matches.push(PatternMatch {
                            rule_id: rule.id.clone(),
                            severity: rule.severity,
                            description: rule.description.clone(),
                            line: None,
                            excerpt: String::new(),
                        });
                    }
                }
            }
        }
        matches.sort_by_key(|m| (m.line.unwrap_or(0), m.rule_id.clone()));
        matches
    }
}
