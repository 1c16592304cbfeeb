//! Retry, timeout and circuit-breaker primitives.
//!
//! # Failure Taxonomy
//!
//! | Failure | Handling |
//! |---------|----------|
//! | Transient network | retried with backoff |
//! | Timeout | retried, surfaced after the budget is spent |
//! | Permission / validation | surfaced immediately (via a predicate) |
//! | Circuit open | rejected without running the operation |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `policy` | [`RetryPolicy`] and the backoff schedule |
//! | `engine` | retry loops and [`with_timeout`] |
//! | `breaker` | [`CircuitBreaker`] and per-key [`BreakerMap`] |

// ============================================================================
// Submodules
// ============================================================================

/// Cross-call circuit breaker.
pub mod breaker;

/// Retry loops.
pub mod engine;

/// Backoff configuration.
pub mod policy;

// ============================================================================
// Re-exports
// ============================================================================

pub use breaker::{BreakerConfig, BreakerMap, BreakerState, CircuitBreaker};
pub use engine::with_timeout;
pub use policy::{JITTER_RATIO, RetryPolicy};
