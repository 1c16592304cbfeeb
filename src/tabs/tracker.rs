//! Per-tab busy/free bookkeeping with a reuse cooldown.
//!
//! A tab that just finished a request is not handed out again until
//! `min_free_time` has passed, so a second prompt never lands while the
//! page is still rendering the first answer.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::SharedClock;
use crate::config::{millis, opt_millis};
use crate::error::{Error, Result};
use crate::identifiers::TabId;

use super::events::TabEvent;
use super::heartbeat::PONG_TIMEOUT;

// ============================================================================
// Constants
// ============================================================================

/// Cooldown before a freed tab can accept another request.
pub const MIN_FREE_TIME: Duration = Duration::from_millis(2000);

// ============================================================================
// TrackerConfig
// ============================================================================

/// Tab tracker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Cooldown after `mark_free`.
    #[serde(with = "millis")]
    pub min_free_time: Duration,

    /// Busy tabs older than this are freed by the sweep.
    #[serde(with = "opt_millis")]
    pub stuck_after: Option<Duration>,

    /// Interval of the sweep that frees stuck tabs and silent conversations.
    #[serde(with = "millis")]
    pub recovery_interval: Duration,

    /// A conversation without a `conversationPong` for this long frees its tab.
    #[serde(with = "millis")]
    pub pong_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_free_time: MIN_FREE_TIME,
            stuck_after: None,
            recovery_interval: Duration::from_secs(5),
            pong_timeout: PONG_TIMEOUT,
        }
    }
}

impl TrackerConfig {
    /// Checks that the sweep can run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero sweep interval or pong timeout.
    pub fn validate(&self) -> Result<()> {
        if self.recovery_interval.is_zero() {
            return Err(Error::config("tabs recoveryInterval must be > 0"));
        }
        if self.pong_timeout.is_zero() {
            return Err(Error::config("tabs pongTimeout must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// TabState
// ============================================================================

/// Availability record for one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabState {
    /// The tab this record belongs to.
    pub tab_id: TabId,
    /// A request is in flight.
    pub is_busy: bool,
    /// Clock time of the last busy/free mark; `0` after a navigation.
    pub last_used: u64,
}

// ============================================================================
// TabTracker
// ============================================================================

/// Tracks which tabs may receive an automation request.
///
/// Constructed once by the process root and shared by `Arc`.
pub struct TabTracker {
    /// State per tab, created lazily.
    states: RwLock<FxHashMap<TabId, TabState>>,
    /// Time source for cooldowns.
    clock: SharedClock,
    /// Cooldown after `mark_free`.
    min_free_time: Duration,
}

impl std::fmt::Debug for TabTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabTracker")
            .field("tracked", &self.tracked_count())
            .field("min_free_time", &self.min_free_time)
            .finish_non_exhaustive()
    }
}

impl TabTracker {
    /// Creates a tracker with the default cooldown.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self::with_min_free_time(clock, MIN_FREE_TIME)
    }

    /// Creates a tracker with a custom cooldown.
    #[must_use]
    pub fn with_min_free_time(clock: SharedClock, min_free_time: Duration) -> Self {
        Self {
            states: RwLock::new(FxHashMap::default()),
            clock,
            min_free_time,
        }
    }

    /// Returns `true` if the tab may take a new request.
    ///
    /// Untracked tabs are always available. Tracked tabs must be free and
    /// past the cooldown, unless a navigation cleared their timestamp.
    #[must_use]
    pub fn can_accept_request(&self, tab_id: TabId) -> bool {
        let states = self.states.read();
        let Some(state) = states.get(&tab_id) else {
            return true;
        };

        if state.is_busy {
            return false;
        }

        if state.last_used == 0 {
            return true;
        }

        let elapsed = self.clock.now_ms().saturating_sub(state.last_used);
        elapsed >= self.min_free_time.as_millis() as u64
    }

    /// Marks the tab busy and stamps the current time.
    pub fn mark_busy(&self, tab_id: TabId) {
        self.mark(tab_id, true);
    }

    /// Marks the tab free and stamps the current time.
    pub fn mark_free(&self, tab_id: TabId) {
        self.mark(tab_id, false);
    }

    fn mark(&self, tab_id: TabId, is_busy: bool) {
        let state = TabState {
            tab_id,
            is_busy,
            last_used: self.clock.now_ms(),
        };
        self.states.write().insert(tab_id, state);
        trace!(%tab_id, is_busy, "Tab marked");
    }

    /// Returns the recorded state, if any.
    #[must_use]
    pub fn status(&self, tab_id: TabId) -> Option<TabState> {
        self.states.read().get(&tab_id).copied()
    }

    /// Number of tabs with recorded state.
    #[inline]
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.states.read().len()
    }

    /// Filters `candidates` down to the tabs that can accept a request.
    #[must_use]
    pub fn available(&self, candidates: impl IntoIterator<Item = TabId>) -> Vec<TabId> {
        candidates
            .into_iter()
            .filter(|tab_id| self.can_accept_request(*tab_id))
            .collect()
    }

    /// Drops all state for a tab.
    pub fn forget(&self, tab_id: TabId) -> Option<TabState> {
        let removed = self.states.write().remove(&tab_id);
        if removed.is_some() {
            debug!(%tab_id, "Tab state removed");
        }
        removed
    }

    /// Frees tabs that have been busy for longer than `max_busy`.
    ///
    /// Returns the ids that were freed.
    pub fn recover_stuck(&self, max_busy: Duration) -> Vec<TabId> {
        let now = self.clock.now_ms();
        let limit = max_busy.as_millis() as u64;
        let mut recovered = Vec::new();

        let mut states = self.states.write();
        for state in states.values_mut() {
            if state.is_busy && now.saturating_sub(state.last_used) > limit {
                state.is_busy = false;
                state.last_used = now;
                recovered.push(state.tab_id);
            }
        }
        drop(states);

        if !recovered.is_empty() {
            debug!(count = recovered.len(), "Recovered stuck tabs");
        }

        recovered
    }

    /// Applies a browser lifecycle event.
    pub fn handle_event(&self, event: &TabEvent) {
        match *event {
            TabEvent::Removed { tab_id } => {
                self.forget(tab_id);
            }

            TabEvent::Updated {
                tab_id,
                status_complete,
                url_changed,
            } => {
                if !(status_complete || url_changed) {
                    return;
                }

                let mut states = self.states.write();
                if let Some(state) = states.get_mut(&tab_id) {
                    state.is_busy = false;
                    state.last_used = 0;
                    debug!(%tab_id, "Tab navigated, cooldown cleared");
                }
            }

            TabEvent::Created { .. } => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
