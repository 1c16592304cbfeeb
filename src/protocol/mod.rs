//! Message types shared by every extension context.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `RuntimeMessage` | Context → Background | Action request |
//! | `Reply` | Background → Context | Action result |
//! | `Notification` | Background → All contexts | Status and inbound frames |
//! | frame | Controller ↔ Background | JSON over WebSocket |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Controller frame helpers |
//! | `message` | `RuntimeMessage` and parameter accessors |
//! | `notification` | Broadcast notifications |
//! | `reply` | `Reply` shape |
//! | `snapshot` | Persisted connection records |

// ============================================================================
// Submodules
// ============================================================================

/// Controller frame helpers.
pub mod frame;

/// Inbound runtime messages.
pub mod message;

/// Broadcast notifications.
pub mod notification;

/// Replies to runtime messages.
pub mod reply;

/// Connection records.
pub mod snapshot;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::RuntimeMessage;
pub use notification::Notification;
pub use reply::Reply;
pub use snapshot::{ConnectionSnapshot, ConnectionStatus, loopback_url};
