//! Notifications broadcast to every extension context.
//!
//! | Action | Payload | When |
//! |--------|---------|------|
//! | `websocketStatusChanged` | `connection` | after every persisted status change |
//! | `websocketMessage` | `connectionId`, `data` | inbound controller frame |
//! | `connectionRemoved` | `connectionId` | record deleted |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::ConnectionId;

use super::snapshot::ConnectionSnapshot;

/// A broadcast notification, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all_fields = "camelCase")]
pub enum Notification {
    /// A connection changed state.
    #[serde(rename = "websocketStatusChanged")]
    StatusChanged {
        /// Full record after the change.
        connection: ConnectionSnapshot,
    },

    /// A frame arrived from the controller.
    #[serde(rename = "websocketMessage")]
    Message {
        /// Source connection.
        connection_id: ConnectionId,
        /// Parsed frame.
        data: Value,
    },

    /// A connection record was deleted.
    #[serde(rename = "connectionRemoved")]
    ConnectionRemoved {
        /// The removed connection.
        connection_id: ConnectionId,
    },
}

impl Notification {
    /// Connection this notification concerns.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Self::StatusChanged { connection } => &connection.id,
            Self::Message { connection_id, .. } | Self::ConnectionRemoved { connection_id } => {
                connection_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let notification = Notification::Message {
            connection_id: ConnectionId::new("ws-1-abc"),
            data: json!({"type": "sendPrompt"}),
        };

        assert_eq!(
            serde_json::to_value(&notification).expect("serialize"),
            json!({
                "action": "websocketMessage",
                "connectionId": "ws-1-abc",
                "data": {"type": "sendPrompt"}
            })
        );
    }

    #[test]
    fn test_status_changed_tag() {
        let snapshot = ConnectionSnapshot::new(ConnectionId::new("ws-1-abc"), 1500);
        let value = serde_json::to_value(Notification::StatusChanged {
            connection: snapshot,
        })
        .expect("serialize");

        assert_eq!(value["action"], "websocketStatusChanged");
        assert_eq!(value["connection"]["port"], 1500);
    }

    #[test]
    fn test_connection_id_accessor() {
        let notification = Notification::ConnectionRemoved {
            connection_id: ConnectionId::new("ws-9-xyz"),
        };
        assert_eq!(notification.connection_id().as_str(), "ws-9-xyz");
    }
}
