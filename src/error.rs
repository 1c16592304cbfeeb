//! Error types for the bridge core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use zentab_bridge::{Result, RetryPolicy};
//!
//! async fn example(policy: &RetryPolicy) -> Result<u32> {
//!     policy.execute(|| async { Ok(42) }).await
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Retried |
//! |----------|----------|---------|
//! | Configuration | [`Error::Config`] | never |
//! | Validation | [`Error::InvalidArgument`], [`Error::PermissionDenied`], [`Error::UnknownAction`] | never |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] | yes |
//! | Lookup | [`Error::ConnectionNotFound`] | never |
//! | Execution | [`Error::Timeout`], [`Error::RetriesExhausted`], [`Error::CircuitOpen`], [`Error::Handler`] | timeout only |
//! | Storage | [`Error::Storage`] | yes |
//! | Protocol | [`Error::Protocol`] | never |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] | io / websocket |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ConnectionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Validation Errors
    // ========================================================================
    /// Invalid argument in message params.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// The browser or page refused the operation.
    ///
    /// Never retried.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Description of the refusal.
        message: String,
    },

    /// No handler registered for an action.
    #[error("Unknown action: {action}")]
    UnknownAction {
        /// The unrecognized action name.
        action: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Opening the socket took too long.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed or not open.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection id is not registered with the manager.
    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound {
        /// The missing connection id.
        connection_id: ConnectionId,
    },

    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Operation timeout.
    #[error("Operation timed out after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Retry budget spent; `source` is the last failure.
    #[error("Failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of times the operation was invoked.
        attempts: u32,
        /// The final error.
        source: Box<Error>,
    },

    /// Circuit breaker rejected the call without running it.
    #[error("Circuit breaker is open (retry in {retry_after_ms}ms)")]
    CircuitOpen {
        /// Milliseconds until a trial call is allowed.
        retry_after_ms: u64,
    },

    /// A message handler failed.
    #[error("Handler error: {message}")]
    Handler {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Storage Errors
    // ========================================================================
    /// Durable storage read or write failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a permission denied error.
    #[inline]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Creates an unknown action error.
    #[inline]
    pub fn unknown_action(action: impl Into<String>) -> Self {
        Self::UnknownAction {
            action: action.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a connection not found error.
    #[inline]
    pub fn connection_not_found(connection_id: ConnectionId) -> Self {
        Self::ConnectionNotFound { connection_id }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Wraps the last failure of a retry sequence.
    #[inline]
    pub fn retries_exhausted(attempts: u32, source: Error) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    /// Creates a circuit open error.
    #[inline]
    pub fn circuit_open(retry_after_ms: u64) -> Self {
        Self::CircuitOpen { retry_after_ms }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[inline]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the failure is transient and may succeed on retry.
    ///
    /// Permission, validation and circuit-open failures are final.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::ConnectionTimeout { .. }
            | Self::ConnectionClosed
            | Self::Timeout { .. }
            | Self::Storage { .. }
            | Self::Io(_)
            | Self::WebSocket(_) => true,
            Self::RetriesExhausted { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns the innermost error, unwrapping retry exhaustion.
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::error::Error as _;
    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_unknown_action_display_contains_name() {
        let err = Error::unknown_action("unknownFoo");
        assert_eq!(err.to_string(), "Unknown action: unknownFoo");
    }

    #[test]
    fn test_retries_exhausted_keeps_cause() {
        let err = Error::retries_exhausted(4, Error::connection("socket reset"));

        assert_eq!(
            err.to_string(),
            "Failed after 4 attempts: Connection failed: socket reset"
        );
        let source = err.source().expect("source should be preserved");
        assert_eq!(source.to_string(), "Connection failed: socket reset");
        assert!(matches!(err.root_cause(), Error::Connection { .. }));
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::timeout("load", 100).is_timeout());
        assert!(Error::connection_timeout(100).is_timeout());
        assert!(!Error::connection("x").is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::connection("reset").is_retryable());
        assert!(Error::timeout("op", 10).is_retryable());
        assert!(!Error::permission_denied("tabs").is_retryable());
        assert!(!Error::invalid_argument("port").is_retryable());
        assert!(!Error::circuit_open(10).is_retryable());
        assert!(
            Error::retries_exhausted(2, Error::ConnectionClosed).is_retryable()
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
