//! Environment identity.
//!
//! # Responsibility
//! - Name one independently administered platform deployment.
//! - Reject identifiers that cannot be used as registry column prefixes.
//!
//! # Invariants
//! - Identifiers are trimmed, non-empty, and use `[a-z0-9_-]` only.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Validated environment identifier, e.g. `test`, `dev`, `prod`.
///
/// Every registry, codec and translator call takes the environment
/// explicitly; there is no process-wide "current environment".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Environment(String);

impl Environment {
    /// Parses and normalizes one environment identifier.
    pub fn parse(value: &str) -> Result<Self, EnvironmentError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EnvironmentError::Empty);
        }
        if !is_valid_environment_id(trimmed) {
            return Err(EnvironmentError::Invalid(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Environment {
    type Error = EnvironmentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Environment> for String {
    fn from(value: Environment) -> Self {
        value.0
    }
}

impl AsRef<str> for Environment {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Environment identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    Empty,
    Invalid(String),
}

impl Display for EnvironmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "environment id cannot be empty"),
            Self::Invalid(value) => write!(
                f,
                "environment id `{value}` is invalid; expected lowercase letters, digits, `_` or `-`"
            ),
        }
    }
}

impl Error for EnvironmentError {}

fn is_valid_environment_id(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
