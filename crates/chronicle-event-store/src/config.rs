//! Write protocol configuration.

use chronicle_core::config::{ConfigError, env_or};

/// Limits and switches of the transactional write protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStoreConfig {
    /// Operations one atomic transaction may hold, header included.
    pub max_operations_per_transaction: usize,
    /// Events one packet may hold.
    pub max_events_per_packet: usize,
    /// Whether oversized writes are packed instead of rejected.
    pub packing_enabled: bool,
    /// Whether writes with a causation id get deterministic identities.
    pub idempotency_enabled: bool,
    /// Re-plans allowed for a conflicting `Any` write. Zero disables the
    /// retry.
    pub any_version_retry_limit: u32,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            max_operations_per_transaction: 100,
            max_events_per_packet: 100,
            packing_enabled: true,
            idempotency_enabled: true,
            any_version_retry_limit: 0,
        }
    }
}

impl EventStoreConfig {
    /// Reads the `CHRONICLE_*` variables, using the defaults for unset ones.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `CHRONICLE_MAX_OPERATIONS_PER_TRANSACTION` | `max_operations_per_transaction` |
    /// | `CHRONICLE_MAX_EVENTS_PER_PACKET` | `max_events_per_packet` |
    /// | `CHRONICLE_PACKING_ENABLED` | `packing_enabled` |
    /// | `CHRONICLE_IDEMPOTENCY_ENABLED` | `idempotency_enabled` |
    /// | `CHRONICLE_ANY_VERSION_RETRY_LIMIT` | `any_version_retry_limit` |
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_operations_per_transaction: env_or(
                "CHRONICLE_MAX_OPERATIONS_PER_TRANSACTION",
                defaults.max_operations_per_transaction,
            )?,
            max_events_per_packet: env_or(
                "CHRONICLE_MAX_EVENTS_PER_PACKET",
                defaults.max_events_per_packet,
            )?,
            packing_enabled: env_or("CHRONICLE_PACKING_ENABLED", defaults.packing_enabled)?,
            idempotency_enabled: env_or(
                "CHRONICLE_IDEMPOTENCY_ENABLED",
                defaults.idempotency_enabled,
            )?,
            any_version_retry_limit: env_or(
                "CHRONICLE_ANY_VERSION_RETRY_LIMIT",
                defaults.any_version_retry_limit,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventStoreConfig::default();

        assert_eq!(config.max_operations_per_transaction, 100);
        assert_eq!(config.max_events_per_packet, 100);
        assert!(config.packing_enabled);
        assert!(config.idempotency_enabled);
        assert_eq!(config.any_version_retry_limit, 0);
    }

    #[test]
    fn test_from_env_without_overrides_matches_defaults() {
        let config = EventStoreConfig::from_env().unwrap();

        assert_eq!(config, EventStoreConfig::default());
    }
}
