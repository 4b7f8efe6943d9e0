//! Timers: cancellable sleep, periodic actions and delays.
//!
//! Inside a job every wait here is interrupted by cancelling that job.
//! Outside a job, [`sleep`] is a plain thread sleep.

use crate::cx::{self, Cx};
use crate::error::{Error, Result};
use crate::job::JobHandle;
use crate::scope::Scope;
use crate::tracing_compat::trace;
use std::time::Duration;

/// Sleeps for `duration`, failing with [`Error::Cancelled`] if the calling
/// job is cancelled first.
pub fn sleep(duration: Duration) -> Result<()> {
    match cx::current_token() {
        Some(token) => token.sleep(duration).map_err(Error::Cancelled),
        None => {
            std::thread::sleep(duration);
            Ok(())
        }
    }
}

/// Launches a job that runs `action` every `period`, starting immediately.
///
/// The job runs until it is cancelled or `action` fails; the failure becomes
/// the job's failure.
pub fn interval<F>(scope: &Scope, period: Duration, mut action: F) -> Result<JobHandle>
where
    F: FnMut(&Cx) -> Result<()> + Send + 'static,
{
    scope.launch(move |cx| {
        let mut ticks: u64 = 0;
        loop {
            cx.checkpoint()?;
            action(cx)?;
            ticks += 1;
            trace!(job = %cx.job_id(), ticks, "interval tick");
            cx.sleep(period)?;
        }
    })
}

/// Launches a job that completes after `duration`.
pub fn delay(scope: &Scope, duration: Duration) -> Result<JobHandle> {
    scope.launch(move |cx| cx.sleep(duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ThreadPerTask;
    use crate::test_utils::{init_test_logging, wait_until};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn scope() -> Scope {
        Scope::with_dispatcher(Arc::new(ThreadPerTask::new()))
    }

    #[test]
    fn interval_runs_first_then_waits() {
        init_test_logging();
        let scope = scope();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        let start = Instant::now();
        let job = interval(&scope, Duration::from_millis(20), move |_cx| {
            sink.lock().push(start.elapsed());
            Ok(())
        })
        .expect("launch");

        assert!(wait_until(Duration::from_secs(2), || ticks.lock().len() >= 3));
        job.cancel();
        assert!(job.wait().expect_err("cancelled").is_cancelled());

        let ticks = ticks.lock();
        assert!(ticks[0] < Duration::from_millis(20));
        for pair in ticks.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(20));
        }
    }

    #[test]
    fn interval_stops_on_action_failure() {
        let scope = scope();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let job = interval(&scope, Duration::from_millis(1), move |_cx| {
            if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                return Err(Error::msg("tick failed"));
            }
            Ok(())
        })
        .expect("launch");
        let err = job.wait().expect_err("failed");
        assert_eq!(err.to_string(), "tick failed");
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_completes_after_duration() {
        let scope = scope();
        let start = Instant::now();
        delay(&scope, Duration::from_millis(25))
            .expect("launch")
            .wait()
            .expect("completes");
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn sleep_inside_job_is_cancellable() {
        let scope = scope();
        let job = scope
            .launch(|_cx| sleep(Duration::from_secs(10)))
            .expect("launch");
        std::thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        job.cancel();
        assert!(job.wait().expect_err("cancelled").is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
