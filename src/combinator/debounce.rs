//! Debouncing: only the last call in a burst produces a result.

use crate::error::Result;
use crate::job::{Job, JobHandle};
use crate::scope::Scope;
use crate::tracing_compat::trace;
use crate::types::{CancelReason, JobId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Pending {
    result: JobHandle,
    timer: Option<JobHandle>,
}

impl Pending {
    fn supersede(self) {
        trace!(job = %self.result.id(), "debounced call superseded");
        if let Some(timer) = self.timer {
            timer.cancel_with(CancelReason::superseded());
        }
        self.result.cancel_with(CancelReason::superseded());
    }
}

type Slot = Arc<Mutex<Option<Pending>>>;

/// Delays each value by a quiet window; a newer call supersedes the pending
/// one.
///
/// A superseded call's job is cancelled with
/// [`CancelKind::Superseded`](crate::types::CancelKind::Superseded). Once a
/// call's window passes, nothing of it is retained.
pub struct Debouncer<T> {
    scope: Scope,
    window: Duration,
    pending: Slot,
    _value: std::marker::PhantomData<fn(T)>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Creates a debouncer whose timers run on `scope`.
    #[must_use]
    pub fn new(scope: &Scope, window: Duration) -> Self {
        Self {
            scope: scope.clone(),
            window,
            pending: Arc::new(Mutex::new(None)),
            _value: std::marker::PhantomData,
        }
    }

    /// The quiet window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a call is waiting out its window.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Submits `value`. The returned job completes with it once `window`
    /// passes without another call.
    pub fn call(&self, value: T) -> Result<Job<T>> {
        let (completer, job) = self.scope.completable::<T>()?;
        let id = job.id();
        let previous = self.pending.lock().replace(Pending {
            result: job.handle(),
            timer: None,
        });
        if let Some(previous) = previous {
            previous.supersede();
        }

        let window = self.window;
        let slot = Arc::clone(&self.pending);
        let launched = self.scope.launch(move |cx| {
            cx.sleep(window)?;
            completer.complete(value);
            clear_if_current(&slot, id);
            Ok(())
        });
        let timer = match launched {
            Ok(timer) => timer,
            Err(err) => {
                clear_if_current(&self.pending, id);
                job.cancel_with(CancelReason::superseded());
                return Err(err);
            }
        };

        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(current) if current.result.id() == id => current.timer = Some(timer),
            // Superseded while launching, or already fired.
            _ => timer.cancel_with(CancelReason::superseded()),
        }
        Ok(job)
    }

    /// Cancels the pending call, if any. Returns true if there was one.
    pub fn cancel(&self) -> bool {
        let previous = self.pending.lock().take();
        match previous {
            Some(previous) => {
                previous.supersede();
                true
            }
            None => false,
        }
    }
}

fn clear_if_current(slot: &Slot, id: JobId) {
    let mut pending = slot.lock();
    if pending.as_ref().is_some_and(|current| current.result.id() == id) {
        *pending = None;
    }
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.window)
            .field("pending", &self.pending.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Inline, ThreadPerTask};
    use crate::test_utils::{init_test_logging, wait_until};
    use crate::types::CancelKind;

    #[test]
    fn only_last_call_in_burst_completes() {
        init_test_logging();
        let scope = Scope::with_dispatcher(Arc::new(ThreadPerTask::new()));
        let debouncer = Debouncer::new(&scope, Duration::from_millis(40));
        let first = debouncer.call(1).expect("call");
        let second = debouncer.call(2).expect("call");
        let third = debouncer.call(3).expect("call");

        assert_eq!(third.join().expect("last call"), 3);
        for superseded in [first, second] {
            let err = superseded.join().expect_err("superseded");
            assert_eq!(
                err.cancel_reason().map(|r| r.kind()),
                Some(CancelKind::Superseded)
            );
        }
    }

    #[test]
    fn fired_call_is_not_retained() {
        init_test_logging();
        let scope = Scope::with_dispatcher(Arc::new(ThreadPerTask::new()));
        let debouncer = Debouncer::new(&scope, Duration::from_millis(10));
        let job = debouncer.call(7).expect("call");
        assert!(debouncer.has_pending());
        assert_eq!(job.join().expect("fires"), 7);
        crate::assert_with_log!(
            wait_until(Duration::from_secs(2), || !debouncer.has_pending()),
            "the slot is cleared once the window passes",
            false,
            debouncer.has_pending()
        );
        assert!(!debouncer.cancel());
    }

    #[test]
    fn inline_timer_fires_without_holding_the_slot() {
        let scope = Scope::with_dispatcher(Arc::new(Inline::new()));
        let debouncer = Debouncer::new(&scope, Duration::from_millis(5));
        let job = debouncer.call("now").expect("call");
        assert!(!debouncer.has_pending());
        assert_eq!(job.join().expect("fired inline"), "now");
    }

    #[test]
    fn spaced_calls_all_complete() {
        let scope = Scope::with_dispatcher(Arc::new(ThreadPerTask::new()));
        let debouncer = Debouncer::new(&scope, Duration::from_millis(10));
        let first = debouncer.call("a").expect("call");
        assert_eq!(first.join().expect("quiet window passed"), "a");
        let second = debouncer.call("b").expect("call");
        assert_eq!(second.join().expect("quiet window passed"), "b");
    }
}
