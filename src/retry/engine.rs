//! Retry loops built on a [`RetryPolicy`].
//!
//! Operations are closures returning a fresh future per attempt. Every
//! failure path returns [`Error::RetriesExhausted`] carrying the attempt
//! count and the last error as its source.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::policy::RetryPolicy;

// ============================================================================
// Timeout
// ============================================================================

/// Races `future` against a deadline.
///
/// # Errors
///
/// Returns [`Error::Timeout`] naming `operation` if the deadline passes
/// first, otherwise whatever the future returns.
pub async fn with_timeout<T, Fut>(
    future: Fut,
    deadline: Duration,
    operation: impl Into<String>,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, deadline.as_millis() as u64)),
    }
}

// ============================================================================
// RetryPolicy - Execution
// ============================================================================

impl RetryPolicy {
    /// Runs `operation`, retrying every failure up to `max_retries` times.
    ///
    /// A permanently failing operation is invoked `max_retries + 1` times.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetriesExhausted`] wrapping the last failure.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(operation, |_, _| true).await
    }

    /// Runs `operation`, retrying only while `should_retry` agrees.
    ///
    /// `should_retry` receives the error and the zero-based attempt that
    /// produced it. Returning `false` stops immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetriesExhausted`] wrapping the last failure, whether
    /// the budget ran out or the predicate declined.
    pub async fn execute_with_condition<T, F, Fut, P>(
        &self,
        mut operation: F,
        mut should_retry: P,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: FnMut(&Error, u32) -> bool,
    {
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }

                Err(e) => {
                    if attempt >= self.max_retries() {
                        warn!(attempts = attempt + 1, error = %e, "Retry budget exhausted");
                        return Err(Error::retries_exhausted(attempt + 1, e));
                    }

                    if !should_retry(&e, attempt) {
                        debug!(attempts = attempt + 1, error = %e, "Error is not retryable");
                        return Err(Error::retries_exhausted(attempt + 1, e));
                    }

                    attempt += 1;
                    let delay = self.jittered_delay_for(attempt);

                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying operation"
                    );

                    sleep(delay).await;
                }
            }
        }
    }

    /// Runs `operation` with a per-attempt deadline.
    ///
    /// Timeouts are retried; any other error stops the sequence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetriesExhausted`] wrapping either the last
    /// [`Error::Timeout`] or the first non-timeout failure.
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        mut operation: F,
        deadline: Duration,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(
            || with_timeout(operation(), deadline, "retry attempt"),
            |e, _| matches!(e, Error::Timeout { .. }),
        )
        .await
    }

    /// Processes `items` in order, retrying each one independently.
    ///
    /// Stops at the first item whose retries are exhausted.
    ///
    /// # Errors
    ///
    /// Returns the exhaustion error of the failing item.
    pub async fn execute_each<I, T, F, Fut>(&self, items: I, mut operation: F) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Clone,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        for (index, item) in items.into_iter().enumerate() {
            trace!(index, "Processing item");
            self.execute(|| operation(item.clone())).await.inspect_err(|e| {
                warn!(index, error = %e, "Failed to process item");
            })?;
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(max_retries)
            .without_jitter()
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_runs_n_plus_one_times() {
        for n in [0u32, 1, 3, 5] {
            let calls = Arc::new(AtomicU32::new(0));
            let policy = fast_policy(n);

            let result: Result<()> = policy
                .execute(|| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(Error::connection("refused"))
                    }
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), n + 1);
            match result {
                Err(Error::RetriesExhausted { attempts, source }) => {
                    assert_eq!(attempts, n + 1);
                    assert_eq!(source.to_string(), "Connection failed: refused");
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));

        let value = fast_policy(3)
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::ConnectionClosed)
                    } else {
                        Ok("sent")
                    }
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, "sent");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_follow_backoff_schedule() {
        let start = Instant::now();

        let _: Result<()> = fast_policy(3)
            .execute(|| async { Err(Error::ConnectionClosed) })
            .await;

        // 100 + 200 + 400
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(700));
        assert!(elapsed < Duration::from_millis(710));
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_stops_on_permission_error() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = fast_policy(5)
            .execute_with_condition(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(Error::permission_denied("tabs.executeScript"))
                    }
                },
                |e, _| e.is_retryable(),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.expect_err("should fail");
        assert!(matches!(err.root_cause(), Error::PermissionDenied { .. }));
        assert!(err.to_string().starts_with("Failed after 1 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_receives_attempt_index() {
        let mut seen = Vec::new();

        let _: Result<()> = fast_policy(4)
            .execute_with_condition(
                || async { Err(Error::ConnectionClosed) },
                |_, attempt| {
                    seen.push(attempt);
                    attempt < 2
                },
            )
            .await;

        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = fast_policy(2)
            .execute_with_timeout(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_secs(60)).await;
                        Ok(())
                    }
                },
                Duration::from_millis(50),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.expect_err("all attempts time out");
        assert!(err.root_cause().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_variant_does_not_retry_other_errors() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = fast_policy(3)
            .execute_with_timeout(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(Error::invalid_argument("prompt is empty"))
                    }
                },
                Duration::from_secs(1),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_passes_through_result() {
        let value = with_timeout(async { Ok(5) }, Duration::from_secs(1), "fast")
            .await
            .expect("completes before deadline");
        assert_eq!(value, 5);

        let err = with_timeout(
            async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_secs(1),
            "slow",
        )
        .await
        .expect_err("deadline passes");
        assert_eq!(err.to_string(), "Operation timed out after 1000ms: slow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_each_stops_at_failing_item() {
        let processed = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let result = fast_policy(1)
            .execute_each([1, 2, 3], |item| {
                let processed = Arc::clone(&processed);
                async move {
                    processed.lock().push(item);
                    if item == 2 {
                        Err(Error::ConnectionClosed)
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*processed.lock(), vec![1, 2, 2]);
    }
}
