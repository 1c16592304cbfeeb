//! Circuit breaker shared across independent calls.
//!
//! Unlike the retry loop, the breaker remembers failures between calls.
//! After `failure_threshold` consecutive failures it opens and rejects
//! immediately for `reset_timeout`, then lets up to
//! `half_open_max_attempts` trial calls through. That many consecutive
//! trial successes close it again; any trial failure re-opens it.
//!
//! Only transient failures count. [`BreakerMap`] keeps one breaker per
//! peer so a single dead peer cannot block calls to the others.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::millis;
use crate::error::{Error, Result};

// ============================================================================
// BreakerConfig
// ============================================================================

/// Thresholds for a [`CircuitBreaker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open after the last failure.
    #[serde(with = "millis")]
    pub reset_timeout: Duration,

    /// Trial calls allowed (and successes required) while half-open.
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_attempts: 3,
        }
    }
}

impl BreakerConfig {
    /// Checks that thresholds are non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either threshold is zero.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::config("breaker failureThreshold must be > 0"));
        }
        if self.half_open_max_attempts == 0 {
            return Err(Error::config("breaker halfOpenMaxAttempts must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// BreakerState
// ============================================================================

/// Circuit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without running.
    Open,
    /// A bounded number of trial calls are allowed.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Mutable breaker bookkeeping.
#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_ms: u64,
    trials_started: u32,
    trial_successes: u32,
}

impl Inner {
    const fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_ms: 0,
            trials_started: 0,
            trial_successes: 0,
        }
    }
}

// ============================================================================
// CircuitBreaker
// ============================================================================

/// Fails fast after repeated failures until a cooldown elapses.
///
/// # Example
///
/// ```ignore
/// let breaker = CircuitBreaker::new(BreakerConfig::default(), SystemClock::shared());
/// let reply = breaker.call(|| send_prompt(tab)).await?;
/// ```
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner::closed()),
        }
    }

    /// Returns the current position, moving `open` to `half_open` once the
    /// reset timeout has elapsed.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.promote_if_cooled(&mut inner);
        inner.state
    }

    /// Consecutive failures recorded so far.
    #[inline]
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Forces the breaker closed and clears its counters.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::closed();
        debug!("Circuit breaker reset");
    }

    /// Runs `operation` through the breaker.
    ///
    /// Only retryable failures (see [`Error::is_retryable`]) count toward
    /// opening the circuit; validation and lookup errors pass through
    /// without affecting it. A half-open trial whose future is dropped
    /// before it settles re-opens the circuit.
    ///
    /// # Errors
    ///
    /// - [`Error::CircuitOpen`] if the circuit rejects the call
    /// - whatever `operation` returns otherwise
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let trial = self.admit()?;

        let result = operation().await;
        trial.settle();

        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.is_retryable() => self.record_failure(e),
            Err(_) => self.record_neutral(),
        }

        result
    }

    /// Decides whether a call may run.
    fn admit(&self) -> Result<Trial<'_>> {
        let mut inner = self.inner.lock();
        self.promote_if_cooled(&mut inner);

        match inner.state {
            BreakerState::Closed => Ok(Trial::untracked(self)),

            BreakerState::Open => Err(Error::circuit_open(self.remaining_open_ms(&inner))),

            BreakerState::HalfOpen => {
                if inner.trials_started >= self.config.half_open_max_attempts {
                    return Err(Error::circuit_open(0));
                }
                inner.trials_started += 1;
                Ok(Trial::tracked(self))
            }
        }
    }

    /// Releases a half-open slot taken by a call that neither succeeded
    /// nor failed transiently.
    fn record_neutral(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trials_started = inner.trials_started.saturating_sub(1);
        }
    }

    /// A half-open trial was cancelled before it settled.
    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::HalfOpen {
            return;
        }

        inner.state = BreakerState::Open;
        inner.last_failure_ms = self.clock.now_ms();
        inner.trials_started = 0;
        inner.trial_successes = 0;
        warn!("Circuit breaker trial abandoned, re-opened");
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::HalfOpen => {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.half_open_max_attempts {
                    *inner = Inner::closed();
                    info!("Circuit breaker closed");
                }
            }
            _ => inner.failure_count = 0,
        }
    }

    fn record_failure(&self, error: &Error) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_ms = self.clock.now_ms();

        let reopen = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.failure_count >= self.config.failure_threshold,
            BreakerState::Open => false,
        };

        if reopen {
            inner.state = BreakerState::Open;
            inner.trials_started = 0;
            inner.trial_successes = 0;
            warn!(
                failures = inner.failure_count,
                error = %error,
                "Circuit breaker opened"
            );
        }
    }

    fn promote_if_cooled(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }

        let elapsed = self.clock.now_ms().saturating_sub(inner.last_failure_ms);
        if elapsed >= self.config.reset_timeout.as_millis() as u64 {
            inner.state = BreakerState::HalfOpen;
            inner.trials_started = 0;
            inner.trial_successes = 0;
            debug!(elapsed_ms = elapsed, "Circuit breaker half-open");
        }
    }

    fn remaining_open_ms(&self, inner: &Inner) -> u64 {
        let elapsed = self.clock.now_ms().saturating_sub(inner.last_failure_ms);
        (self.config.reset_timeout.as_millis() as u64).saturating_sub(elapsed)
    }
}

// ============================================================================
// Trial
// ============================================================================

/// Admission ticket for one call.
///
/// Dropping a tracked ticket without settling it abandons the trial.
struct Trial<'a> {
    breaker: &'a CircuitBreaker,
    pending: bool,
}

impl<'a> Trial<'a> {
    const fn untracked(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            pending: false,
        }
    }

    const fn tracked(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            pending: true,
        }
    }

    /// The operation finished; its outcome is recorded by the caller.
    fn settle(mut self) {
        self.pending = false;
    }
}

impl Drop for Trial<'_> {
    fn drop(&mut self) {
        if self.pending {
            self.breaker.abandon_trial();
        }
    }
}

// ============================================================================
// BreakerMap
// ============================================================================

/// One [`CircuitBreaker`] per key, created on first use.
///
/// Keeps failures of one peer from tripping calls to another.
pub struct BreakerMap<K> {
    config: BreakerConfig,
    clock: SharedClock,
    breakers: Mutex<FxHashMap<K, Arc<CircuitBreaker>>>,
}

impl<K> fmt::Debug for BreakerMap<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerMap")
            .field("config", &self.config)
            .field("breakers", &self.breakers.lock().len())
            .finish_non_exhaustive()
    }
}

impl<K: Eq + Hash + Clone> BreakerMap<K> {
    /// Creates an empty map; every breaker shares `config`.
    #[must_use]
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            breakers: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the breaker for `key`, creating a closed one if needed.
    #[must_use]
    pub fn get(&self, key: &K) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(key.clone()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                self.config.clone(),
                Arc::clone(&self.clock),
            ))
        });
        Arc::clone(breaker)
    }

    /// Returns the breaker for `key` only if one exists.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().get(key).cloned()
    }

    /// Drops the breaker for `key`.
    pub fn remove(&self, key: &K) -> bool {
        self.breakers.lock().remove(key).is_some()
    }

    /// Number of keys with a breaker.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.lock().len()
    }

    /// Returns `true` if no breaker has been created yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
