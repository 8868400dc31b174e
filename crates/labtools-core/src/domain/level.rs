//! Diagnostics levels 0 through 9.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// A validated diagnostics depth. Level `L` executes every check of levels `0..=L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct DiagnosticsLevel(u8);

impl DiagnosticsLevel {
    pub const OFF: DiagnosticsLevel = DiagnosticsLevel(0);
    pub const MATH_INTEGRITY: DiagnosticsLevel = DiagnosticsLevel(3);
    pub const AUDIT_READY: DiagnosticsLevel = DiagnosticsLevel(9);

    pub fn new(level: i64) -> Result<Self, ConfigError> {
        if (0..=9).contains(&level) {
            Ok(Self(level as u8))
        } else {
            Err(ConfigError::InvalidLevel(level))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Levels executed by a run at this depth, in ascending order.
    pub fn through(self) -> impl Iterator<Item = u8> {
        0..=self.0
    }

    pub fn focus(self) -> &'static str {
        focus(self.0)
    }
}

/// Human-readable focus of a level, used in reports.
pub fn focus(level: u8) -> &'static str {
    match level {
        0 => "off",
        1 => "structure",
        2 => "scope echo",
        3 => "math integrity",
        4 => "localization",
        5 => "governance",
        6 => "decision readout",
        7 => "reproducibility",
        8 => "safety",
        9 => "audit ready",
        _ => "unknown",
    }
}

impl Default for DiagnosticsLevel {
    fn default() -> Self {
        Self::MATH_INTEGRITY
    }
}

impl TryFrom<i64> for DiagnosticsLevel {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<u8> for DiagnosticsLevel {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(i64::from(value))
    }
}

impl From<DiagnosticsLevel> for u8 {
    fn from(level: DiagnosticsLevel) -> u8 {
        level.0
    }
}

impl fmt::Display for DiagnosticsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DiagnosticsLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed: i64 = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("diagnostics level is not an integer: {s}")))?;
        Self::new(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_bounds() {
        assert!(DiagnosticsLevel::new(0).is_ok());
        assert!(DiagnosticsLevel::new(9).is_ok());
        match DiagnosticsLevel::new(10) {
            Err(ConfigError::InvalidLevel(10)) => {}
            other => panic!("expected InvalidLevel(10), got {:?}", other),
        }
        assert!(matches!(
            DiagnosticsLevel::new(-1),
            Err(ConfigError::InvalidLevel(-1))
        ));
    }

    #[test]
    fn test_through_is_inclusive() {
        let levels: Vec<u8> = DiagnosticsLevel::new(3).expect("level").through().collect();
        assert_eq!(levels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_serde_rejects_out_of_range() {
        let ok: DiagnosticsLevel = serde_json::from_str("5").expect("level 5");
        assert_eq!(ok.value(), 5);
        assert!(serde_json::from_str::<DiagnosticsLevel>("42").is_err());
        assert_eq!(serde_json::to_string(&ok).expect("ser"), "5");
    }

    #[test]
    fn test_default_is_math_integrity() {
        assert_eq!(DiagnosticsLevel::default().value(), 3);
        assert_eq!(DiagnosticsLevel::default().focus(), "math integrity");
    }
}
