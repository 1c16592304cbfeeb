//! Cross-context message router.
//!
//! Dispatches runtime messages to handlers by their `action` field and
//! guarantees exactly one structured reply per message.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use zentab_bridge::{Reply, Router};
//!
//! let router = Router::new()
//!     .route_fn("ping", |_| async { Ok(Reply::ok()) });
//!
//! let reply = router.dispatch(json!({"action": "ping"})).await;
//! assert_eq!(reply["success"], true);
//! ```
//!
//! # Failure Replies
//!
//! | Input | Reply `error` |
//! |-------|---------------|
//! | not an object | `Invalid message format` |
//! | no string `action` | `Missing action field` |
//! | unregistered action | `Unknown action: <name>` |
//! | handler `Err` | the error message |
//! | handler panic | `Handler panicked: <action>` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handler` | `Handler` trait and closure adapter |
//! | `responder` | One-shot reply channel |

// ============================================================================
// Submodules
// ============================================================================

/// Action handler trait.
pub mod handler;

/// One-shot reply channel.
pub mod responder;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::protocol::{Reply, RuntimeMessage};

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::{FnHandler, Handler};
pub use responder::Responder;

// ============================================================================
// Router
// ============================================================================

/// Action name to handler table.
///
/// Cloning is cheap; handlers are shared.
#[derive(Clone, Default)]
pub struct Router {
    routes: FxHashMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("actions", &self.actions())
            .finish()
    }
}

impl Router {
    /// Creates an empty router.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `action`, replacing any previous one.
    #[must_use]
    pub fn route(mut self, action: impl Into<String>, handler: impl Handler + 'static) -> Self {
        let action = action.into();
        if self.routes.insert(action.clone(), Arc::new(handler)).is_some() {
            debug!(action = %action, "Handler replaced");
        }
        self
    }

    /// Registers an async closure for `action`.
    #[must_use]
    pub fn route_fn<F, Fut>(self, action: impl Into<String>, f: F) -> Self
    where
        F: Fn(RuntimeMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        self.route(action, FnHandler::new(f))
    }

    /// Returns `true` if `action` has a handler.
    #[inline]
    #[must_use]
    pub fn contains(&self, action: &str) -> bool {
        self.routes.contains_key(action)
    }

    /// Registered action names, sorted.
    #[must_use]
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    /// Dispatches `message` and answers through `responder`.
    pub async fn handle(&self, message: Value, responder: Responder) {
        let reply = self.dispatch_reply(message).await;
        responder.send(reply);
    }

    /// Dispatches `message` and returns the reply object.
    pub async fn dispatch(&self, message: Value) -> Value {
        self.dispatch_reply(message).await.into_value()
    }

    /// Dispatches `message` and returns the typed reply.
    pub async fn dispatch_reply(&self, message: Value) -> Reply {
        let message = match RuntimeMessage::from_value(message) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Rejected runtime message");
                return Reply::from(&e);
            }
        };

        let Some(handler) = self.routes.get(&message.action).cloned() else {
            warn!(action = %message.action, "Unknown action");
            return Reply::from(&Error::unknown_action(message.action));
        };

        let action = message.action.clone();
        debug!(action = %action, "Dispatching");

        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(action = %action, error = %e, "Handler failed");
                Reply::from(&e)
            }
            Err(_) => {
                error!(action = %action, "Handler panicked");
                Reply::failure(format!("Handler panicked: {action}"))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn router() -> Router {
        Router::new()
            .route_fn("echo", |message: RuntimeMessage| async move {
                let text = message.require_str("text")?.to_string();
                Ok::<_, Error>(Reply::ok().with("text", Value::String(text)))
            })
            .route_fn("fail", |_| async { Err(Error::handler("boom")) })
            .route_fn("explode", |message: RuntimeMessage| async move {
                assert!(message.get("never").is_some(), "handler bug");
                Ok(Reply::ok())
            })
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let reply = router().dispatch(json!({"action": "echo", "text": "hi"})).await;
        assert_eq!(reply, json!({"success": true, "text": "hi"}));
    }

    #[tokio::test]
    async fn test_unknown_action_names_the_action() {
        let reply = router().dispatch(json!({"action": "unknownFoo"})).await;
        assert_eq!(reply["success"], false);
        assert!(reply["error"].as_str().expect("error").contains("unknownFoo"));
    }

    #[tokio::test]
    async fn test_shape_errors() {
        let router = router();

        let reply = router.dispatch(json!(42)).await;
        assert_eq!(reply, json!({"success": false, "error": "Invalid message format"}));

        let reply = router.dispatch(json!({"text": "hi"})).await;
        assert_eq!(reply, json!({"success": false, "error": "Missing action field"}));
    }

    #[tokio::test]
    async fn test_handler_errors_become_replies() {
        let router = router();

        let reply = router.dispatch(json!({"action": "fail"})).await;
        assert_eq!(reply, json!({"success": false, "error": "Handler error: boom"}));

        let reply = router.dispatch(json!({"action": "echo"})).await;
        assert_eq!(reply, json!({"success": false, "error": "'text' must be a string"}));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let reply = router().dispatch(json!({"action": "explode"})).await;
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error"], "Handler panicked: explode");
    }

    #[tokio::test]
    async fn test_handle_answers_through_responder() {
        let (responder, rx) = Responder::channel();
        router().handle(json!({"action": "nope"}), responder).await;

        let reply = rx.await.expect("reply");
        assert_eq!(reply["error"], "Unknown action: nope");
    }

    #[test]
    fn test_actions_listing() {
        let router = router();
        assert_eq!(router.actions(), vec!["echo", "explode", "fail"]);
        assert!(router.contains("echo"));
        assert!(!router.contains("ping"));
    }
}
