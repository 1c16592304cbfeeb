//! Cross-context notification bus.
//!
//! Every extension context (sidebar, content scripts, the controller
//! bridge) subscribes to one broadcast channel. Publishing never blocks and
//! never fails: with no subscribers the notification is simply dropped, and
//! a slow subscriber lags rather than stalling the publisher.

use tokio::sync::broadcast;
use tracing::trace;

use crate::protocol::Notification;

/// Broadcast channel of [`Notification`]s.
#[derive(Debug, Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<Notification>,
}

impl MessageBus {
    /// Creates a bus that buffers up to `capacity` notifications per
    /// subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. [`crate::BridgeConfig::validate`]
    /// rejects that value.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Registers a new subscriber.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Sends to all current subscribers.
    pub fn publish(&self, notification: Notification) {
        match self.sender.send(notification) {
            Ok(receivers) => trace!(receivers, "Notification published"),
            Err(_) => trace!("Notification dropped, no subscribers"),
        }
    }

    /// Number of live subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
