//! Helpers for reading configuration from environment variables.
//!
//! Config constructors take a lookup function so tests can supply values
//! without touching the process environment; `from_env` constructors pass
//! [`process_env`].

use std::str::FromStr;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}={value}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },

    #[error("{name} is required")]
    Missing { name: String },
}

impl ConfigError {
    pub fn invalid(name: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name: name.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Read a variable from the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Trimmed value, or `None` when unset or blank.
pub fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Look up a non-empty string value.
pub fn string_var<L>(lookup: &L, name: &str) -> Option<String>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(non_empty)
}

/// Look up and parse a value, `None` when unset.
pub fn parse_var<T, L>(lookup: &L, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    match string_var(lookup, name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(name, raw.clone(), e.to_string())),
    }
}

/// Look up a boolean (`1/true/yes/y`, `0/false/no/n`).
pub fn bool_var<L>(lookup: &L, name: &str) -> Result<Option<bool>, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    let Some(raw) = string_var(lookup, name) else {
        return Ok(None);
    };

    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(name, raw, "expected true/false")),
    }
}
