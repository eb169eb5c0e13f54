//! Failure isolation and retry primitives.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Per-service circuit breaker with a single half-open trial |
//! | [`retry`] | Fixed-delay retry policy |
//!
//! ```rust
//! use gateway_resilience::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "runner",
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(3)
//!         .with_reset_timeout(Duration::from_secs(60)),
//! );
//!
//! if let Ok(permit) = breaker.try_acquire() {
//!     // call the service...
//!     permit.success();
//! }
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use retry::{Decision, RetryPolicy};
