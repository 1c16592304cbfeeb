//! One-shot reply channel.

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::protocol::Reply;

/// Sends the single reply to one inbound message.
///
/// `send` consumes the responder, so a message can never be answered
/// twice. Dropping it unanswered closes the receiver.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Value>,
}

impl Responder {
    /// Creates a responder and the receiver its reply arrives on.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Delivers the reply.
    ///
    /// Returns `false` if the sender has stopped waiting.
    pub fn send(self, reply: Reply) -> bool {
        let delivered = self.tx.send(reply.into_value()).is_ok();
        if !delivered {
            trace!("Reply dropped, receiver gone");
        }
        delivered
    }

    /// Returns `true` if the receiver has been dropped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl From<oneshot::Sender<Value>> for Responder {
    fn from(tx: oneshot::Sender<Value>) -> Self {
        Self { tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[tokio::test]
    async fn test_send_delivers_once() {
        let (responder, rx) = Responder::channel();
        assert!(!responder.is_closed());
        assert!(responder.send(Reply::ok()));
        assert_eq!(rx.await.expect("reply"), json!({"success": true}));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (responder, rx) = Responder::channel();
        drop(rx);
        assert!(responder.is_closed());
        assert!(!responder.send(Reply::ok()));
    }
}
