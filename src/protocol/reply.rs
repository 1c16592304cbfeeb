//! Replies to runtime messages.
//!
//! # Format
//!
//! Success:
//! ```json
//! { "success": true, "connectionId": "ws-1718000000000-3f9a1c2be" }
//! ```
//!
//! Error:
//! ```json
//! { "success": false, "error": "Unknown action: unknownFoo" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Structured reply sent back for every inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Whether the action succeeded.
    pub success: bool,

    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Action-specific payload, flattened into the reply object.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Reply {
    /// A bare success reply.
    #[inline]
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: Map::new(),
        }
    }

    /// A failure reply with a message.
    #[inline]
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: Map::new(),
        }
    }

    /// Adds a payload field.
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Converts into the JSON sent over the wire.
    #[must_use]
    pub fn into_value(self) -> Value {
        let mut object = self.data;
        object.insert("success".to_string(), Value::Bool(self.success));
        if let Some(error) = self.error {
            object.insert("error".to_string(), Value::String(error));
        }
        Value::Object(object)
    }
}

impl From<&Error> for Reply {
    /// Validation errors surface their bare message; everything else uses
    /// the full display string.
    fn from(error: &Error) -> Self {
        match error {
            Error::InvalidArgument { message } => Self::failure(message.clone()),
            other => Self::failure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_ok_with_payload() {
        let value = Reply::ok().with("canAccept", json!(true)).into_value();
        assert_eq!(value, json!({"success": true, "canAccept": true}));
    }

    #[test]
    fn test_failure_shape() {
        let value = Reply::failure("boom").into_value();
        assert_eq!(value, json!({"success": false, "error": "boom"}));
    }

    #[test]
    fn test_from_error() {
        let reply = Reply::from(&Error::unknown_action("unknownFoo"));
        assert_eq!(reply.error.as_deref(), Some("Unknown action: unknownFoo"));

        let reply = Reply::from(&Error::invalid_argument("Missing action field"));
        assert_eq!(reply.error.as_deref(), Some("Missing action field"));
    }

    #[test]
    fn test_deserialize_flattened() {
        let reply: Reply =
            serde_json::from_value(json!({"success": true, "count": 2})).expect("deserialize");
        assert!(reply.success);
        assert_eq!(reply.data.get("count"), Some(&json!(2)));
    }
}
