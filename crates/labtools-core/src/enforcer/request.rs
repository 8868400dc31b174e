//! Operations the enforcer is asked to authorize.

use serde::{Deserialize, Serialize};

use crate::run_context::environment::ENV_RUN_TOKEN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenSource {
    /// Set explicitly on the command.
    Explicit(String),
    /// Explicitly removed from the command's environment.
    Removed,
    /// Inherited from the parent process.
    Inherited,
}

/// A subprocess about to be spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub token: TokenSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Managed,
    MissingToken,
    TokenMismatch,
}

impl Classification {
    pub fn is_managed(self) -> bool {
        self == Classification::Managed
    }
}

impl SpawnRequest {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            token: TokenSource::Inherited,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = TokenSource::Explicit(token.into());
        self
    }

    pub fn without_token(mut self) -> Self {
        self.token = TokenSource::Removed;
        self
    }

    /// Describe a `std::process::Command`. Variables hidden by `env_clear`
    /// are not observable here and count as inherited.
    pub fn from_command(cmd: &std::process::Command) -> Self {
        let mut request = Self::new(
            cmd.get_program().to_string_lossy(),
            cmd.get_args().map(|a| a.to_string_lossy().into_owned()),
        );
        for (key, value) in cmd.get_envs() {
            if key == ENV_RUN_TOKEN {
                request.token = match value {
                    Some(v) => TokenSource::Explicit(v.to_string_lossy().into_owned()),
                    None => TokenSource::Removed,
                };
            }
        }
        request
    }

    /// The token the child would actually see.
    pub fn effective_token(&self) -> Option<String> {
        match &self.token {
            TokenSource::Explicit(t) => Some(t.clone()),
            TokenSource::Removed => None,
            TokenSource::Inherited => std::env::var(ENV_RUN_TOKEN).ok(),
        }
    }

    pub fn classify(&self, run_token: &str) -> Classification {
        match self.effective_token() {
            Some(t) if t == run_token => Classification::Managed,
            Some(_) => Classification::TokenMismatch,
            None => Classification::MissingToken,
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOp {
    Read,
    Write,
}
