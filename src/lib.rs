//! Zentab Bridge - coordination core for AI chat browser automation.
//!
//! This library is the bookkeeping half of a browser extension that drives
//! AI chat web applications in browser tabs on behalf of an external
//! controller. It does no DOM work.
//!
//! # Architecture
//!
//! The bridge sits between two peers:
//!
//! - **Extension contexts**: sidebar and content scripts send runtime
//!   messages and receive broadcast notifications
//! - **Controller**: an external process listening on `ws://localhost:PORT`
//!   that the bridge dials as a WebSocket client
//!
//! Key design principles:
//!
//! - One [`Background`] owns every component; nothing is a global singleton
//! - Every connection status change is persisted before it is broadcast
//! - Reconnects use a fixed delay and a bounded attempt budget
//! - Time flows through an injectable [`Clock`] for deterministic tests
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use zentab_bridge::{Background, BridgeConfig, FileStorage, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let storage = Arc::new(FileStorage::new("bridge-state.json"));
//!     let background = Background::start(BridgeConfig::default(), storage).await?;
//!
//!     // Register a controller and watch its status
//!     let mut notifications = background.subscribe();
//!     let reply = background
//!         .dispatch(json!({"action": "addConnection", "port": 1500}))
//!         .await;
//!     println!("addConnection: {reply}");
//!
//!     if let Ok(notification) = notifications.recv().await {
//!         println!("{notification:?}");
//!     }
//!
//!     background.shutdown().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`background`] | Process root and built-in actions |
//! | [`bus`] | Cross-context notification broadcast |
//! | [`clock`] | Injectable millisecond clock |
//! | [`config`] | [`BridgeConfig`] and JSON loading |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Runtime messages, replies, notifications |
//! | [`retry`] | Backoff, timeouts, circuit breaker |
//! | [`router`] | Action dispatch |
//! | [`storage`] | Durable key/value store |
//! | [`tabs`] | Tab availability and conversation heartbeats |
//! | [`transport`] | WebSocket connection manager |

// ============================================================================
// Modules
// ============================================================================

/// Process root.
///
/// [`Background`] wires the tracker, connection manager, bus and router.
pub mod background;

/// Notification broadcast to every extension context.
pub mod bus;

/// Injectable time source.
pub mod clock;

/// Bridge configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers keep tab ids and connection ids apart.
pub mod identifiers;

/// Message types shared by every context.
pub mod protocol;

/// Retry, timeout and circuit-breaker primitives.
pub mod retry;

/// Action router.
pub mod router;

/// Durable key/value storage.
pub mod storage;

/// Tab availability tracking.
pub mod tabs;

/// WebSocket transport to the controller.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Process root
pub use background::Background;
pub use bus::MessageBus;

// Time and configuration
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::BridgeConfig;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, TabId};

// Protocol types
pub use protocol::{ConnectionSnapshot, ConnectionStatus, Notification, Reply, RuntimeMessage};

// Retry types
pub use retry::{
    BreakerConfig, BreakerMap, BreakerState, CircuitBreaker, RetryPolicy, with_timeout,
};

// Routing types
pub use router::{FnHandler, Handler, Responder, Router};

// Storage types
pub use storage::{FileStorage, MemoryStorage, Storage};

// Tab types
pub use tabs::{
    Heartbeat, HeartbeatMonitor, ListenerHandle, MIN_FREE_TIME, PONG_TIMEOUT, TabEvent, TabState,
    TabTracker, TrackerConfig,
};

// Transport types
pub use transport::{ConnectionConfig, ConnectionManager};
