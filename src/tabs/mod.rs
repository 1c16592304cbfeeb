//! Tab availability tracking.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `tracker` | [`TabTracker`] busy/free state with cooldown |
//! | `events` | [`TabEvent`] lifecycle input and [`ListenerHandle`] |
//! | `heartbeat` | [`HeartbeatMonitor`] frees tabs of silent conversations |

/// Browser lifecycle events.
pub mod events;

/// Conversation pong tracking.
pub mod heartbeat;

/// Busy/free bookkeeping.
pub mod tracker;

pub use events::{ListenerHandle, TabEvent};
pub use heartbeat::{Heartbeat, HeartbeatMonitor, PONG_TIMEOUT};
pub use tracker::{MIN_FREE_TIME, TabState, TabTracker, TrackerConfig};
