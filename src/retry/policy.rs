//! Backoff schedule configuration.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::millis;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Jitter spread applied around the computed delay (±20%).
pub const JITTER_RATIO: f64 = 0.2;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Immutable retry configuration.
///
/// Built once and shared across calls. The delay before retry `n`
/// (1-indexed) is `min(initial_delay * backoff_factor^(n-1), max_delay)`,
/// optionally scaled by a uniform factor in `[0.8, 1.2]`.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use zentab_bridge::RetryPolicy;
///
/// let policy = RetryPolicy::new()
///     .with_max_retries(5)
///     .with_initial_delay(Duration::from_millis(200))
///     .without_jitter();
///
/// assert_eq!(policy.delay_for(3), Duration::from_millis(800));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "millis")]
    initial_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(with = "millis")]
    max_delay: Duration,

    /// Multiplier applied per retry.
    backoff_factor: f64,

    /// Randomize each delay by ±20%.
    #[serde(rename = "jitter")]
    jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
            backoff_factor: 2.0,
            jitter_enabled: true,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl RetryPolicy {
    /// Creates a policy with default settings (3 retries, 100ms → 5s, x2, jitter).
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[inline]
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RetryPolicy {
    /// Sets the number of retries after the first attempt.
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    #[inline]
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay cap.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the exponential factor.
    #[inline]
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Disables jitter, making the schedule deterministic.
    #[inline]
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_enabled = false;
        self
    }

    /// Enables or disables jitter.
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    /// Checks that the schedule is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the factor is below 1 or not finite, or
    /// if the initial delay exceeds the cap.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::config(format!(
                "retry backoffFactor must be >= 1, got {}",
                self.backoff_factor
            )));
        }

        if self.initial_delay > self.max_delay {
            return Err(Error::config(format!(
                "retry initialDelay ({}ms) exceeds maxDelay ({}ms)",
                self.initial_delay.as_millis(),
                self.max_delay.as_millis()
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl RetryPolicy {
    /// Additional attempts after the first failure.
    #[inline]
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    #[inline]
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound for any single delay.
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Exponential factor.
    #[inline]
    #[must_use]
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Whether delays are randomized.
    #[inline]
    #[must_use]
    pub fn jitter_enabled(&self) -> bool {
        self.jitter_enabled
    }
}

// ============================================================================
// Schedule
// ============================================================================

impl RetryPolicy {
    /// Unjittered delay before retry `attempt` (1-indexed).
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = (initial_ms * self.backoff_factor.powi(exponent)).min(max_ms);

        Duration::from_millis(delay_ms.round() as u64)
    }

    /// Delay before retry `attempt`, with jitter applied when enabled.
    #[must_use]
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if !self.jitter_enabled {
            return base;
        }

        let factor = rand::thread_rng().gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO));
        apply_jitter(base, factor)
    }
}

/// Scales `base` by `factor`, rounding down to whole milliseconds.
#[inline]
fn apply_jitter(base: Duration, factor: f64) -> Duration {
    Duration::from_millis((base.as_millis() as f64 * factor).floor() as u64)
}

// ============================================================================
// Tests
// ============================================================================
