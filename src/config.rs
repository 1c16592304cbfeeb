//! Bridge configuration.
//!
//! Provides a single [`BridgeConfig`] that groups the settings of every
//! component. It can be built in code with `with_*` methods or loaded from
//! a JSON file whose keys mirror the extension's camelCase settings.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use zentab_bridge::{BridgeConfig, ConnectionConfig};
//!
//! let config = BridgeConfig::new().with_connections(
//!     ConnectionConfig::default()
//!         .with_max_reconnect_attempts(10)
//!         .with_reconnect_delay(Duration::from_secs(5)),
//! );
//! config.validate()?;
//! ```
//!
//! ```json
//! {
//!   "retry": { "maxRetries": 3, "initialDelay": 100, "maxDelay": 5000 },
//!   "connections": { "maxReconnectAttempts": 5, "reconnectDelay": 3000 },
//!   "tabs": { "minFreeTime": 2000, "pongTimeout": 10000 }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::retry::{BreakerConfig, RetryPolicy};
use crate::tabs::TrackerConfig;
use crate::transport::ConnectionConfig;

// ============================================================================
// Constants
// ============================================================================

/// Default capacity of the cross-context notification channel.
const DEFAULT_BUS_CAPACITY: usize = 256;

/// Largest accepted notification channel capacity.
pub const MAX_BUS_CAPACITY: usize = 65_536;

// ============================================================================
// BridgeConfig
// ============================================================================

/// Settings for every component of the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Default retry policy for prompt submission and storage writes.
    pub retry: RetryPolicy,

    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,

    /// Tab tracker settings.
    pub tabs: TrackerConfig,

    /// WebSocket connection manager settings.
    pub connections: ConnectionConfig,

    /// Buffered notifications per subscriber before it lags.
    pub bus_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            tabs: TrackerConfig::default(),
            connections: ConnectionConfig::default(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is malformed
    /// - [`Error::Config`] if validation fails
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Json`] if the document is malformed
    /// - [`Error::Config`] if validation fails
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;

        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeConfig {
    /// Sets the retry policy.
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the circuit breaker thresholds.
    #[inline]
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Sets the tab tracker settings.
    #[inline]
    #[must_use]
    pub fn with_tabs(mut self, tabs: TrackerConfig) -> Self {
        self.tabs = tabs;
        self
    }

    /// Sets the connection manager settings.
    #[inline]
    #[must_use]
    pub fn with_connections(mut self, connections: ConnectionConfig) -> Self {
        self.connections = connections;
        self
    }

    /// Sets the notification channel capacity.
    #[inline]
    #[must_use]
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.breaker.validate()?;
        self.tabs.validate()?;
        self.connections.validate()?;

        if self.bus_capacity == 0 || self.bus_capacity > MAX_BUS_CAPACITY {
            return Err(Error::config(format!(
                "busCapacity must be between 1 and {MAX_BUS_CAPACITY}, got {}",
                self.bus_capacity
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

/// (De)serializes a `Duration` as whole milliseconds.
pub(crate) mod millis {
    use std::result::Result as StdResult;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> StdResult<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> StdResult<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// (De)serializes an `Option<Duration>` as milliseconds or `null`.
pub(crate) mod opt_millis {
    use std::result::Result as StdResult;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> StdResult<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> StdResult<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connections.max_reconnect_attempts, 5);
        assert_eq!(config.connections.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.tabs.min_free_time, Duration::from_secs(2));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json_str(
            r#"{"connections":{"maxReconnectAttempts":2},"tabs":{"stuckAfter":60000}}"#,
        )
        .expect("valid config");

        assert_eq!(config.connections.max_reconnect_attempts, 2);
        assert_eq!(config.connections.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.tabs.stuck_after, Some(Duration::from_secs(60)));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_invalid_section_is_rejected() {
        let result = BridgeConfig::from_json_str(r#"{"retry":{"backoffFactor":0.1}}"#);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_bus_capacity_bounds() {
        assert!(BridgeConfig::new().with_bus_capacity(0).validate().is_err());
        assert!(BridgeConfig::new().with_bus_capacity(MAX_BUS_CAPACITY).validate().is_ok());

        let result = BridgeConfig::from_json_str(r#"{"busCapacity":18446744073709551615}"#);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_zero_sweep_interval_is_rejected() {
        let result = BridgeConfig::from_json_str(r#"{"tabs":{"recoveryInterval":0}}"#);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_round_trips_through_file() {
        let config = BridgeConfig::new()
            .with_retry(RetryPolicy::new().with_max_retries(9).without_jitter());

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        let json = serde_json::to_string_pretty(&config).expect("serialize");
        file.write_all(json.as_bytes()).expect("write");

        let loaded = BridgeConfig::from_json_file(file.path()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = BridgeConfig::from_json_file("/nonexistent/zentab.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
