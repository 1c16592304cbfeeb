//! Conversation heartbeats.
//!
//! While the controller runs a conversation in a tab it answers periodic
//! pings with `conversationPong` frames. The first pong that names a tab
//! starts tracking the conversation; later pongs refresh it. A
//! conversation that stays silent for longer than the pong timeout is
//! dropped and its tab marked free.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::identifiers::TabId;
use crate::protocol::frame;

use super::tracker::TabTracker;

// ============================================================================
// Constants
// ============================================================================

/// Silence after which a conversation is considered gone.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Heartbeat
// ============================================================================

/// Liveness record of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Tab the conversation runs in.
    pub tab_id: TabId,
    /// Clock time of the last pong.
    pub last_pong_time: u64,
}

// ============================================================================
// HeartbeatMonitor
// ============================================================================

/// Tracks `conversationPong` frames per conversation.
pub struct HeartbeatMonitor {
    clock: SharedClock,
    pong_timeout: Duration,
    conversations: Mutex<FxHashMap<String, Heartbeat>>,
}

impl fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("pong_timeout", &self.pong_timeout)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl HeartbeatMonitor {
    /// Creates a monitor with no active conversations.
    #[must_use]
    pub fn new(clock: SharedClock, pong_timeout: Duration) -> Self {
        Self {
            clock,
            pong_timeout,
            conversations: Mutex::new(FxHashMap::default()),
        }
    }

    /// Starts, or restarts, tracking a conversation.
    pub fn start(&self, conversation_id: impl Into<String>, tab_id: TabId) {
        let conversation_id = conversation_id.into();
        let heartbeat = Heartbeat {
            tab_id,
            last_pong_time: self.clock.now_ms(),
        };

        debug!(conversation_id = %conversation_id, %tab_id, "Heartbeat started");
        self.conversations.lock().insert(conversation_id, heartbeat);
    }

    /// Stops tracking a conversation.
    pub fn stop(&self, conversation_id: &str) -> Option<Heartbeat> {
        self.conversations.lock().remove(conversation_id)
    }

    /// Refreshes the pong time. Returns `false` if the conversation is
    /// not tracked.
    pub fn record_pong(&self, conversation_id: &str) -> bool {
        let now = self.clock.now_ms();
        match self.conversations.lock().get_mut(conversation_id) {
            Some(heartbeat) => {
                heartbeat.last_pong_time = now;
                true
            }
            None => false,
        }
    }

    /// Current record of a conversation.
    #[must_use]
    pub fn status(&self, conversation_id: &str) -> Option<Heartbeat> {
        self.conversations.lock().get(conversation_id).copied()
    }

    /// Number of tracked conversations.
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.conversations.lock().len()
    }

    /// Feeds one controller frame.
    ///
    /// Returns `true` if the frame was a pong for a tracked or newly
    /// started conversation.
    pub fn observe(&self, data: &Value) -> bool {
        if !frame::is_conversation_pong(data) {
            return false;
        }
        let Some(conversation_id) = frame::conversation_id(data) else {
            return false;
        };

        if self.record_pong(conversation_id) {
            return true;
        }

        match data
            .get("tabId")
            .and_then(Value::as_u64)
            .and_then(TabId::from_u64)
        {
            Some(tab_id) => {
                self.start(conversation_id, tab_id);
                true
            }
            None => false,
        }
    }

    /// Drops conversations silent for longer than the pong timeout and
    /// marks their tabs free.
    ///
    /// Returns the freed tabs.
    pub fn expire(&self, tracker: &TabTracker) -> Vec<TabId> {
        let now = self.clock.now_ms();
        let limit = self.pong_timeout.as_millis() as u64;

        let expired: Vec<(String, Heartbeat)> = {
            let mut conversations = self.conversations.lock();
            let silent: Vec<String> = conversations
                .iter()
                .filter(|(_, heartbeat)| now.saturating_sub(heartbeat.last_pong_time) > limit)
                .map(|(id, _)| id.clone())
                .collect();

            silent
                .into_iter()
                .filter_map(|id| conversations.remove(&id).map(|heartbeat| (id, heartbeat)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(conversation_id, heartbeat)| {
                warn!(
                    conversation_id = %conversation_id,
                    tab_id = %heartbeat.tab_id,
                    silent_ms = now.saturating_sub(heartbeat.last_pong_time),
                    "Pong timeout, freeing tab"
                );
                tracker.mark_free(heartbeat.tab_id);
                heartbeat.tab_id
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
