//! Circuit breaker.
//!
//! # States
//!
//! - **Closed**: calls pass through. Consecutive failures are counted and a
//!   success resets the count; reaching `max_failures` opens the circuit.
//! - **Open**: calls fail fast with [`Error::CircuitOpen`] until
//!   `reset_timeout` has passed since the circuit opened.
//! - **HalfOpen**: exactly one trial call is let through while others are
//!   refused. Success closes the circuit; failure re-opens it and restarts
//!   the timer.
//!
//! Cancellation is neither a success nor a failure: a cancelled trial leaves
//! the circuit half-open for the next caller.

use crate::config::ConfigError;
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::scope::Scope;
use crate::tracing_compat::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Calls pass through.
    Closed,
    /// Calls are refused.
    Open,
    /// One trial call decides the next state.
    HalfOpen,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Thresholds for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerPolicy {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// How long the circuit stays open before allowing a trial call.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            max_failures,
            reset_timeout,
        }
    }

    /// Rejects a zero failure threshold.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_failures == 0 {
            return Err(ConfigError::Invalid {
                field: "max_failures",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Counters kept by a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that were let through.
    pub calls: u64,
    /// Calls that succeeded.
    pub successes: u64,
    /// Calls that failed.
    pub failures: u64,
    /// Calls refused because the circuit was open.
    pub rejections: u64,
}

/// Callback invoked with `(from, to)` on every state change.
pub type StateChangeCallback = Arc<dyn Fn(State, State) + Send + Sync>;

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    metrics: CircuitBreakerMetrics,
}

enum Admission {
    Normal,
    Trial,
}

/// Shared circuit breaker; clones refer to the same circuit.
#[derive(Clone)]
pub struct CircuitBreaker {
    policy: CircuitBreakerPolicy,
    inner: Arc<Mutex<Inner>>,
    on_change: Arc<Mutex<Option<StateChangeCallback>>>,
}

impl CircuitBreaker {
    /// Creates a closed circuit.
    pub fn new(policy: CircuitBreakerPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                metrics: CircuitBreakerMetrics::default(),
            })),
            on_change: Arc::new(Mutex::new(None)),
        })
    }

    /// The policy.
    #[must_use]
    pub fn policy(&self) -> &CircuitBreakerPolicy {
        &self.policy
    }

    /// The current state. An open circuit whose timeout has passed reports
    /// [`State::HalfOpen`].
    #[must_use]
    pub fn state(&self) -> State {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (State::Open, Some(opened)) if opened.elapsed() >= self.policy.reset_timeout => {
                State::HalfOpen
            }
            (state, _) => state,
        }
    }

    /// A snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().metrics
    }

    /// Sets the state-change callback, replacing any earlier one.
    pub fn on_state_change(&self, callback: impl Fn(State, State) + Send + Sync + 'static) {
        *self.on_change.lock() = Some(Arc::new(callback));
    }

    /// Forces the circuit closed and clears the failure count.
    pub fn reset(&self) {
        let change = {
            let mut inner = self.inner.lock();
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            inner.trial_in_flight = false;
            Self::transition(&mut inner, State::Closed)
        };
        self.announce(change);
    }

    /// Runs `op` through the circuit on the calling thread.
    pub fn call<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let (admission, change) = self.admit();
        self.announce(change);
        let admission = admission?;

        let outcome = op();
        let change = self.record(&admission, &outcome);
        self.announce(change);
        outcome
    }

    /// Launches a job on `scope` that runs `body` through the circuit.
    pub fn execute<T, F>(&self, scope: &Scope, body: F) -> Result<Job<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Cx) -> Result<T> + Send + 'static,
    {
        let breaker = self.clone();
        scope.spawn(move |cx| breaker.call(|| body(cx)))
    }

    fn admit(&self) -> (Result<Admission>, Option<(State, State)>) {
        let mut inner = self.inner.lock();
        let mut change = None;
        if inner.state == State::Open {
            let elapsed = inner.opened_at.map_or(Duration::MAX, |at| at.elapsed());
            if elapsed >= self.policy.reset_timeout {
                change = Self::transition(&mut inner, State::HalfOpen);
            }
        }
        let admission = match inner.state {
            State::Closed => Ok(Admission::Normal),
            State::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(Admission::Trial)
            }
            State::HalfOpen | State::Open => {
                inner.metrics.rejections += 1;
                Err(Error::CircuitOpen)
            }
        };
        if admission.is_ok() {
            inner.metrics.calls += 1;
        }
        (admission, change)
    }

    fn record<T>(&self, admission: &Admission, outcome: &Result<T>) -> Option<(State, State)> {
        let mut inner = self.inner.lock();
        if let Admission::Trial = admission {
            inner.trial_in_flight = false;
        }
        match outcome {
            Err(err) if err.is_cancelled() => None,
            Ok(_) => {
                inner.metrics.successes += 1;
                inner.consecutive_failures = 0;
                Self::transition(&mut inner, State::Closed)
            }
            Err(_) => {
                inner.metrics.failures += 1;
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                let trip = matches!(admission, Admission::Trial)
                    || inner.consecutive_failures >= self.policy.max_failures;
                if trip {
                    inner.opened_at = Some(Instant::now());
                    Self::transition(&mut inner, State::Open)
                } else {
                    None
                }
            }
        }
    }

    fn transition(inner: &mut Inner, to: State) -> Option<(State, State)> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        Some((from, to))
    }

    fn announce(&self, change: Option<(State, State)>) {
        let Some((from, to)) = change else {
            return;
        };
        match to {
            State::Open => warn!(from = %from, "circuit opened"),
            _ => info!(from = %from, to = %to, "circuit state changed"),
        }
        let callback = self.on_change.lock().clone();
        if let Some(callback) = callback {
            callback(from, to);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("policy", &self.policy)
            .field("state", &self.state())
            .field("metrics", &self.metrics())
            .finish()
    }
}
