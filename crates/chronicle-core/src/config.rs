//! Environment-driven configuration helpers.

use std::str::FromStr;

use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("configuration error: {name} has invalid value {value:?}: {reason}")]
    InvalidValue {
        /// Variable name.
        name: String,
        /// Raw value found.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Reads `name` from the environment, falling back to `default` when unset.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if the variable is set but does not
/// parse as `T`.
pub fn env_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                name: name.to_owned(),
                reason: e.to_string(),
                value,
            }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_returns_default_when_unset() {
        let value: u32 = env_or("CHRONICLE_TEST_SURELY_UNSET_VARIABLE", 17).unwrap();

        assert_eq!(value, 17);
    }
}
