//! Sliding-window rate limiting.

use crate::config::ConfigError;
use crate::cx::Cx;
use crate::error::Result;
use crate::job::Job;
use crate::scope::Scope;
use crate::time;
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Admits at most `max_requests` acquisitions in any `window`.
///
/// Timestamps of recent admissions are kept in order; an acquisition that
/// finds the window full waits until the oldest one ages out.
#[derive(Clone)]
pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Arc<Mutex<VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    /// Creates a limiter. Fails if `max_requests` is zero or `window` is empty.
    pub fn new(max_requests: usize, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(ConfigError::Invalid {
                field: "max_requests",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if window.is_zero() {
            return Err(ConfigError::Invalid {
                field: "window",
                reason: "must be non-zero".into(),
            }
            .into());
        }
        Ok(Self {
            max_requests,
            window,
            admitted: Arc::new(Mutex::new(VecDeque::with_capacity(max_requests))),
        })
    }

    /// Admissions allowed per window.
    #[must_use]
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// The window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admissions still available right now.
    #[must_use]
    pub fn available(&self) -> usize {
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, Instant::now());
        self.max_requests - admitted.len()
    }

    /// Blocks until admitted.
    ///
    /// Inside a job the wait is cancellable and fails with
    /// [`Error::Cancelled`](crate::Error::Cancelled).
    pub fn acquire(&self) -> Result<()> {
        loop {
            let wait = {
                let mut admitted = self.admitted.lock();
                let now = Instant::now();
                self.prune(&mut admitted, now);
                if admitted.len() < self.max_requests {
                    admitted.push_back(now);
                    return Ok(());
                }
                admitted
                    .front()
                    .map_or(Duration::ZERO, |oldest| (*oldest + self.window).saturating_duration_since(now))
            };
            trace!(wait_ms = wait.as_millis() as u64, "rate limit reached");
            time::sleep(wait)?;
        }
    }

    /// Admits without waiting if the window has room.
    pub fn try_acquire(&self) -> bool {
        let mut admitted = self.admitted.lock();
        let now = Instant::now();
        self.prune(&mut admitted, now);
        if admitted.len() < self.max_requests {
            admitted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Launches a job on `scope` that acquires, then runs `body`.
    pub fn execute<T, F>(&self, scope: &Scope, body: F) -> Result<Job<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Cx) -> Result<T> + Send + 'static,
    {
        let limiter = self.clone();
        scope.spawn(move |cx| {
            limiter.acquire()?;
            body(cx)
        })
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while admitted
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            admitted.pop_front();
        }
    }
}

impl std::fmt::Debug for SlidingWindowRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowRateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::runtime::ThreadPerTask;
    use crate::test_utils::init_test_logging;
    use crate::types::CancelKind;

    #[test]
    fn try_acquire_fills_the_window() {
        init_test_logging();
        let limiter = SlidingWindowRateLimiter::new(2, Duration::from_millis(40)).expect("valid");
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available(), 0);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(limiter.available(), 2);
        assert!(limiter.try_acquire());
    }

    #[test]
    fn acquire_waits_for_oldest_to_age_out() {
        let limiter = SlidingWindowRateLimiter::new(3, Duration::from_millis(50)).expect("valid");
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().expect("room");
        }
        assert!(start.elapsed() < Duration::from_millis(50));
        limiter.acquire().expect("after window");
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn acquire_inside_job_is_cancellable() {
        let scope = Scope::with_dispatcher(Arc::new(ThreadPerTask::new()));
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(60)).expect("valid");
        assert!(limiter.try_acquire());
        let job = limiter.execute(&scope, |_cx| Ok(())).expect("spawn");
        std::thread::sleep(Duration::from_millis(20));
        job.cancel();
        let err = job.join().expect_err("cancelled while waiting");
        assert_eq!(err.cancel_reason().map(|r| r.kind()), Some(CancelKind::User));
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(matches!(
            SlidingWindowRateLimiter::new(0, Duration::from_secs(1)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SlidingWindowRateLimiter::new(1, Duration::ZERO),
            Err(Error::Config(_))
        ));
    }
}
