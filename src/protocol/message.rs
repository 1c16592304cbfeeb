//! Cross-context runtime messages.
//!
//! Every message exchanged between the background worker, the sidebar and
//! content scripts is a JSON object with a required `action` string; all
//! other keys are action-specific parameters.
//!
//! # Format
//!
//! ```json
//! { "action": "markTabBusy", "tabId": 42 }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, TabId};

// ============================================================================
// RuntimeMessage
// ============================================================================

/// An inbound message addressed to a handler by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMessage {
    /// Handler name.
    pub action: String,

    /// Remaining keys of the message object.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl RuntimeMessage {
    /// Creates a message with no parameters.
    #[inline]
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
        }
    }

    /// Adds a parameter.
    #[inline]
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Validates the raw JSON shape and splits off the action.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] with `Invalid message format` if the
    ///   value is not an object
    /// - [`Error::InvalidArgument`] with `Missing action field` if `action`
    ///   is absent or not a string
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut params) = value else {
            return Err(Error::invalid_argument("Invalid message format"));
        };

        match params.remove("action") {
            Some(Value::String(action)) => Ok(Self { action, params }),
            _ => Err(Error::invalid_argument("Missing action field")),
        }
    }

    /// Converts back into a JSON object.
    #[must_use]
    pub fn into_value(self) -> Value {
        let mut object = self.params;
        object.insert("action".to_string(), Value::String(self.action));
        Value::Object(object)
    }
}

// ============================================================================
// Parameter Accessors
// ============================================================================

impl RuntimeMessage {
    /// Gets a raw parameter.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Gets a string parameter.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Gets an unsigned integer parameter.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    /// Gets a required string parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if missing or not a string.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| Error::invalid_argument(format!("'{key}' must be a string")))
    }

    /// Gets a required unsigned integer parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if missing or not a non-negative integer.
    pub fn require_u64(&self, key: &str) -> Result<u64> {
        self.get_u64(key)
            .ok_or_else(|| Error::invalid_argument(format!("'{key}' must be a non-negative integer")))
    }

    /// Reads the `tabId` parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if missing or out of range.
    pub fn tab_id(&self) -> Result<TabId> {
        let raw = self.require_u64("tabId")?;
        TabId::from_u64(raw)
            .ok_or_else(|| Error::invalid_argument(format!("tabId out of range: {raw}")))
    }

    /// Reads the `connectionId` parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if missing.
    pub fn connection_id(&self) -> Result<ConnectionId> {
        self.require_str("connectionId").map(ConnectionId::from)
    }

    /// Reads a `port` parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if missing, zero or above 65535.
    pub fn port(&self) -> Result<u16> {
        let raw = self.require_u64("port")?;
        match u16::try_from(raw) {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(Error::invalid_argument(format!("invalid port: {raw}"))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_from_value_splits_action() {
        let message = RuntimeMessage::from_value(json!({"action": "markTabBusy", "tabId": 42}))
            .expect("valid message");

        assert_eq!(message.action, "markTabBusy");
        assert_eq!(message.tab_id().expect("tab id"), TabId::new(42));
        assert!(message.get("action").is_none());
    }

    #[test]
    fn test_non_object_is_invalid_format() {
        let err = RuntimeMessage::from_value(json!("ping")).expect_err("not an object");
        assert_eq!(err.to_string(), "Invalid argument: Invalid message format");
    }

    #[test]
    fn test_missing_action() {
        let err = RuntimeMessage::from_value(json!({"tabId": 1})).expect_err("no action");
        assert_eq!(err.to_string(), "Invalid argument: Missing action field");

        let err = RuntimeMessage::from_value(json!({"action": 7})).expect_err("numeric action");
        assert_eq!(err.to_string(), "Invalid argument: Missing action field");
    }

    #[test]
    fn test_port_validation() {
        let ok = RuntimeMessage::new("addConnection").with_param("port", json!(1500));
        assert_eq!(ok.port().expect("port"), 1500);

        let zero = RuntimeMessage::new("addConnection").with_param("port", json!(0));
        assert!(zero.port().is_err());

        let big = RuntimeMessage::new("addConnection").with_param("port", json!(70000));
        assert!(big.port().is_err());
    }

    #[test]
    fn test_negative_tab_id_is_rejected() {
        let message = RuntimeMessage::new("getTabStatus").with_param("tabId", json!(-1));
        assert!(matches!(message.tab_id(), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_into_value_restores_action() {
        let value = RuntimeMessage::new("ping").with_param("x", json!(1)).into_value();
        assert_eq!(value, json!({"action": "ping", "x": 1}));
    }
}
