//! LabTools validation runner
//!
//! Discovers tiered validation scripts under a root directory and executes
//! them as managed children of a run: every child carries the run
//! environment, so the execution enforcer recognizes it.

pub mod discover;
pub mod error;
pub mod runner;

pub use discover::{discover, Discovery, Interpreter, ScriptDescriptor};
pub use error::{ValidationRunError, ValidationRunResult};
pub use runner::{ValidationRunner, ENV_VALIDATION_TIER};

pub use labtools_core::domain::validation::aggregate;
