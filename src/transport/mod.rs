//! WebSocket transport to the external controller.
//!
//! The extension is the client: each registered connection dials
//! `ws://localhost:<port>` where the controller listens.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐                        ┌─────────────────┐
//! │  Background           │                        │  Controller     │
//! │                       │       WebSocket        │  (external)     │
//! │  ConnectionManager    │◄──────────────────────►│                 │
//! │  → Socket (per conn)  │     localhost:PORT     │  WebSocket      │
//! │                       │                        │  Server         │
//! └───────────────────────┘                        └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionManager::add_connection` - Register port, persist, connect
//! 2. `Socket` - Event loop rebroadcasts frames, answers keep-alives
//! 3. Close - Fixed-delay reconnect while attempts remain
//! 4. `ConnectionManager::disconnect` - Close without reconnecting
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `manager` | Connection registry, state machine, persistence |
//! | `socket` | Per-connection event loop |

// ============================================================================
// Submodules
// ============================================================================

/// Connection registry and state machine.
pub mod manager;

/// Per-connection event loop.
mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use manager::{
    ConnectionConfig, ConnectionManager, DEFAULT_DEDUP_WINDOW, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
