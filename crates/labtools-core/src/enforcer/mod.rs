//! Execution enforcement: subprocess token checks, protected paths and
//! throwaway-code scanning, all recorded in the attached run's audit log.

pub mod engine;
pub mod error;
pub mod policy;
pub mod request;
pub mod rules;

pub use engine::{EnforcerHandle, ExecutionEnforcer};
pub use error::{EnforcerError, EnforcerResult, PolicyViolation, ViolationKind};
pub use policy::{EnforcementPolicy, InterceptedOp, Strictness};
pub use request::{Classification, FileOp, SpawnRequest, TokenSource};
pub use rules::{CompiledRuleSet, PatternMatch, RuleMode, Severity, ThrowawayRule};
