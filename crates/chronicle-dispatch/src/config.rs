//! Dispatcher configuration.

use std::time::Duration;

use chronicle_core::config::{ConfigError, env_or};

/// Default pause between delivery attempts of a failing event.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Settings shared by every subscription of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Fixed wait before a failed delivery is attempted again.
    pub retry_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl DispatcherConfig {
    /// Reads `CHRONICLE_DISPATCH_RETRY_BACKOFF_MS`, defaulting to one second.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the variable is set to a non-integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let default_ms = u64::try_from(DEFAULT_RETRY_BACKOFF.as_millis()).unwrap_or(u64::MAX);
        let retry_backoff_ms = env_or("CHRONICLE_DISPATCH_RETRY_BACKOFF_MS", default_ms)?;
        Ok(Self {
            retry_backoff: Duration::from_millis(retry_backoff_ms),
        })
    }
}
