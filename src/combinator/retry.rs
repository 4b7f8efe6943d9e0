//! Retry with exponential backoff.
//!
//! The delay before retry `n` (0-indexed) is `initial_delay × multiplier^n`,
//! clamped to `max_delay`. Each delay is derived from the attempt number
//! alone, so rounding never compounds.

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::scope::Scope;
use crate::tracing_compat::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least one attempt is always
    /// made.
    pub attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor applied per retry. `1.0` keeps the delay constant.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `attempts` tries with a constant `delay` between them.
    #[must_use]
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            initial_delay: delay,
            ..Self::default()
        }
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// The delay before retry `attempt` (0-indexed).
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs < 0.0 || secs > self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Runs `body` on the calling unit until it succeeds or the policy is
/// exhausted, returning the last failure.
///
/// The body receives the attempt number, starting at 1. Cancellation is never
/// retried.
pub fn retry_in<T, F>(cx: &Cx, policy: &RetryPolicy, mut body: F) -> Result<T>
where
    F: FnMut(&Cx, u32) -> Result<T>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        cx.checkpoint()?;
        match body(cx, attempt) {
            Ok(value) => return Ok(value),
            Err(err @ (Error::Cancelled(_) | Error::FlowAborted)) => return Err(err),
            Err(err) if attempt >= attempts => {
                warn!(attempts, error = %err, "retry attempts exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.calculate_delay(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "attempt failed, retrying");
                cx.sleep(delay)?;
                attempt += 1;
            }
        }
    }
}

/// Launches a job on `scope` that runs `body` under `policy`.
pub fn retry<T, F>(scope: &Scope, policy: RetryPolicy, body: F) -> Result<Job<T>>
where
    T: Send + 'static,
    F: FnMut(&Cx, u32) -> Result<T> + Send + 'static,
{
    scope.spawn(move |cx| retry_in(cx, &policy, body))
}
