//! Action handler trait.

use std::future::Future;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Reply, RuntimeMessage};

/// Handles one action.
///
/// Returning `Err` produces a `{"success": false, "error": ...}` reply.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Processes `message` and builds the reply.
    async fn handle(&self, message: RuntimeMessage) -> Result<Reply>;
}

/// Adapter that turns an async closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    /// Wraps `f`.
    #[inline]
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(RuntimeMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    async fn handle(&self, message: RuntimeMessage) -> Result<Reply> {
        (self.f)(message).await
    }
}
