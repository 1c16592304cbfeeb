//! Browser tab lifecycle events and listener registration.
//!
//! The host publishes [`TabEvent`]s on a `tokio::sync::broadcast` channel.
//! [`TabTracker::listen`] subscribes a tracker to that channel and returns
//! a [`ListenerHandle`]; dropping or detaching the handle stops the
//! listener task.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::identifiers::TabId;

use super::tracker::TabTracker;

// ============================================================================
// TabEvent
// ============================================================================

/// A tab lifecycle notification from the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TabEvent {
    /// A tab was opened.
    #[serde(rename_all = "camelCase")]
    Created {
        /// The new tab.
        tab_id: TabId,
    },

    /// A tab changed (load progress, URL, title...).
    #[serde(rename_all = "camelCase")]
    Updated {
        /// The changed tab.
        tab_id: TabId,
        /// The page finished loading.
        status_complete: bool,
        /// The tab navigated to a new URL.
        url_changed: bool,
    },

    /// A tab was closed.
    #[serde(rename_all = "camelCase")]
    Removed {
        /// The closed tab.
        tab_id: TabId,
    },
}

impl TabEvent {
    /// The tab the event refers to.
    #[inline]
    #[must_use]
    pub fn tab_id(&self) -> TabId {
        match *self {
            Self::Created { tab_id } | Self::Updated { tab_id, .. } | Self::Removed { tab_id } => {
                tab_id
            }
        }
    }
}

// ============================================================================
// ListenerHandle
// ============================================================================

/// Owns a running event listener; aborting it on drop.
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stops the listener and waits for the task to wind down.
    pub async fn detach(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }

    /// Returns `true` once the listener task has ended.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// TabTracker - Listener
// ============================================================================

impl TabTracker {
    /// Subscribes the tracker to tab lifecycle events.
    ///
    /// The listener ends when the channel closes or the handle is dropped.
    /// Lagging behind the channel only loses events, never the listener.
    #[must_use = "dropping the handle stops the listener"]
    pub fn listen(self: &Arc<Self>, mut events: broadcast::Receiver<TabEvent>) -> ListenerHandle {
        let tracker = Arc::clone(self);

        let task = tokio::spawn(async move {
            debug!("Tab event listener started");

            loop {
                match events.recv().await {
                    Ok(event) => tracker.handle_event(&event),

                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Tab event listener lagged");
                    }

                    Err(RecvError::Closed) => {
                        debug!("Tab event channel closed");
                        break;
                    }
                }
            }
        });

        ListenerHandle { task }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::clock::{ManualClock, SharedClock};

    fn tracker() -> Arc<TabTracker> {
        let clock: SharedClock = Arc::new(ManualClock::new(1_700_000_000_000));
        Arc::new(TabTracker::new(clock))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event: TabEvent =
            serde_json::from_str(r#"{"event":"updated","tabId":4,"statusComplete":true,"urlChanged":false}"#)
                .expect("deserialize");

        assert_eq!(
            event,
            TabEvent::Updated {
                tab_id: TabId::new(4),
                status_complete: true,
                url_changed: false,
            }
        );
        assert_eq!(event.tab_id(), TabId::new(4));
    }

    #[tokio::test]
    async fn test_listener_applies_removal() {
        let tracker = tracker();
        let (tx, rx) = broadcast::channel(16);
        let handle = tracker.listen(rx);

        tracker.mark_busy(TabId::new(42));
        tx.send(TabEvent::Removed {
            tab_id: TabId::new(42),
        })
        .expect("listener subscribed");
        settle().await;

        assert!(tracker.status(TabId::new(42)).is_none());
        assert!(tracker.can_accept_request(TabId::new(42)));
        handle.detach().await;
    }

    #[tokio::test]
    async fn test_detached_listener_ignores_events() {
        let tracker = tracker();
        let (tx, rx) = broadcast::channel(16);
        let handle = tracker.listen(rx);

        handle.detach().await;
        tracker.mark_busy(TabId::new(1));
        let _ = tx.send(TabEvent::Removed {
            tab_id: TabId::new(1),
        });
        settle().await;

        assert!(tracker.status(TabId::new(1)).is_some());
    }

    #[tokio::test]
    async fn test_listener_ends_when_channel_closes() {
        let tracker = tracker();
        let (tx, rx) = broadcast::channel::<TabEvent>(4);
        let handle = tracker.listen(rx);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener finishes");
    }
}
