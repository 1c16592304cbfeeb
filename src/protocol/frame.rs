//! Controller frame helpers.
//!
//! Frames are JSON objects sent as text. The transport reads `type` for
//! keep-alive handling and `requestId` for de-duplication; the heartbeat
//! monitor reads `conversationId` and `tabId`.

use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Keep-alive ping sent by the controller.
pub const PING: &str = "ping";

/// Keep-alive answer.
pub const PONG: &str = "pong";

/// Conversation heartbeat answer; never de-duplicated.
pub const CONVERSATION_PONG: &str = "conversationPong";

/// Parses a text frame.
///
/// # Errors
///
/// - [`Error::Json`] if the text is not JSON
/// - [`Error::Protocol`] if the JSON is not an object
pub fn parse(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(Error::protocol("frame is not a JSON object"));
    }
    Ok(value)
}

/// The frame's `type` field.
#[inline]
#[must_use]
pub fn frame_type(frame: &Value) -> Option<&str> {
    frame.get("type").and_then(Value::as_str)
}

/// The frame's `requestId` field.
#[inline]
#[must_use]
pub fn request_id(frame: &Value) -> Option<&str> {
    frame.get("requestId").and_then(Value::as_str)
}

/// Returns `true` for controller keep-alive pings.
#[inline]
#[must_use]
pub fn is_ping(frame: &Value) -> bool {
    frame_type(frame) == Some(PING)
}

/// Returns `true` for conversation heartbeat answers.
#[inline]
#[must_use]
pub fn is_conversation_pong(frame: &Value) -> bool {
    frame_type(frame) == Some(CONVERSATION_PONG)
}

/// The frame's `conversationId` field.
#[inline]
#[must_use]
pub fn conversation_id(frame: &Value) -> Option<&str> {
    frame.get("conversationId").and_then(Value::as_str)
}

/// Key to de-duplicate on, if this frame takes part in de-duplication.
#[must_use]
pub fn dedup_key(frame: &Value) -> Option<&str> {
    if is_conversation_pong(frame) {
        return None;
    }
    request_id(frame)
}

/// Builds the keep-alive answer.
#[must_use]
pub fn pong(timestamp_ms: u64) -> Value {
    json!({ "type": PONG, "timestamp": timestamp_ms })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse("{not json"), Err(Error::Json(_))));
        assert!(matches!(parse("[1, 2]"), Err(Error::Protocol { .. })));
        assert!(matches!(parse("\"ping\""), Err(Error::Protocol { .. })));
        assert_eq!(parse(r#"{"type":"ping"}"#).expect("parse"), json!({"type": "ping"}));
    }

    #[test]
    fn test_dedup_key() {
        assert_eq!(dedup_key(&json!({"type": "sendPrompt", "requestId": "r1"})), Some("r1"));
        assert_eq!(dedup_key(&json!({"type": "conversationPong", "requestId": "r1"})), None);
        assert_eq!(dedup_key(&json!({"type": "focusedTabsUpdate"})), None);
    }

    #[test]
    fn test_pong_shape() {
        assert_eq!(pong(7), json!({"type": "pong", "timestamp": 7}));
        assert!(is_ping(&json!({"type": "ping"})));
        assert!(!is_ping(&pong(7)));
    }
}
