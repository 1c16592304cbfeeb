//! Connection records as persisted and broadcast.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::ConnectionId;

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Lifecycle state of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Socket open is in flight.
    Connecting,
    /// Socket is open.
    Connected,
    /// No socket. Initial and post-close state.
    #[default]
    Disconnected,
    /// Opening the socket failed.
    Error,
}

impl ConnectionStatus {
    /// Returns `true` for `connecting` and `connected`.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ConnectionSnapshot
// ============================================================================

/// Point-in-time copy of a connection record.
///
/// Field names match what the sidebar reads from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Connection id.
    pub id: ConnectionId,

    /// Loopback port.
    pub port: u16,

    /// `ws://localhost:<port>`.
    pub url: String,

    /// Current state.
    #[serde(default)]
    pub status: ConnectionStatus,

    /// Epoch millis of the last successful open.
    #[serde(default)]
    pub last_connected: Option<u64>,

    /// Automatic reconnects scheduled since the last successful open.
    #[serde(default)]
    pub reconnect_attempts: u32,
}

impl ConnectionSnapshot {
    /// Creates a fresh, disconnected record for `port`.
    #[must_use]
    pub fn new(id: ConnectionId, port: u16) -> Self {
        Self {
            id,
            port,
            url: loopback_url(port),
            status: ConnectionStatus::Disconnected,
            last_connected: None,
            reconnect_attempts: 0,
        }
    }
}

/// Builds the controller URL for a port.
#[inline]
#[must_use]
pub fn loopback_url(port: u16) -> String {
    format!("ws://localhost:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_snapshot_wire_shape() {
        let snapshot = ConnectionSnapshot::new(ConnectionId::new("ws-1-abc"), 1500);
        let value = serde_json::to_value(&snapshot).expect("serialize");

        assert_eq!(
            value,
            json!({
                "id": "ws-1-abc",
                "port": 1500,
                "url": "ws://localhost:1500",
                "status": "disconnected",
                "lastConnected": null,
                "reconnectAttempts": 0
            })
        );
    }

    #[test]
    fn test_status_is_active() {
        assert!(ConnectionStatus::Connecting.is_active());
        assert!(ConnectionStatus::Connected.is_active());
        assert!(!ConnectionStatus::Disconnected.is_active());
        assert!(!ConnectionStatus::Error.is_active());
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_deserialize_partial_record() {
        let snapshot: ConnectionSnapshot = serde_json::from_value(json!({
            "id": "ws-2-def",
            "port": 1600,
            "url": "ws://localhost:1600"
        }))
        .expect("deserialize");

        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.last_connected, None);
    }
}
