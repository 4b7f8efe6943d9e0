//! Resilience combinators built from scopes, jobs and channels.
//!
//! - [`retry`]: re-run a body with backoff
//! - [`with_timeout`]: fail a body that runs past a deadline
//! - [`race`]: first to finish wins
//! - [`parallel`] / [`parallel_limited`]: run many, gather in input order
//! - [`Debouncer`]: only the last call of a burst produces a result
//! - [`Throttler`]: at most one emission per window
//! - [`CircuitBreaker`]: fail fast while a dependency keeps failing
//! - [`SlidingWindowRateLimiter`]: cap admissions per window
//! - [`with_context`]: run a body under a derived context
//!
//! Every combinator that launches work takes the [`Scope`](crate::Scope) to
//! launch it on, so closing that scope stops it.

pub mod circuit_breaker;
mod context;
mod debounce;
mod parallel;
mod race;
pub mod rate_limit;
pub mod retry;
mod throttle;
pub mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitBreakerPolicy, State, StateChangeCallback,
};
pub use context::with_context;
pub use debounce::Debouncer;
pub use parallel::{parallel, parallel_limited};
pub use race::race;
pub use rate_limit::SlidingWindowRateLimiter;
pub use retry::{retry, retry_in, RetryPolicy};
pub use throttle::Throttler;
pub use timeout::{with_timeout, with_timeout_or_else};
