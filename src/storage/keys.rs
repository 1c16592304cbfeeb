//! Storage keys shared with the extension UI.

/// Persisted WebSocket connection list.
pub const WS_CONNECTIONS: &str = "wsConnections";
