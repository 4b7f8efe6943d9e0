//! Throttling: at most one emission per window.

use crate::error::{Error, Result};
use crate::job::{Completer, Job};
use crate::scope::Scope;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Waiting<T> {
    latest: T,
    completers: Vec<Completer<T>>,
}

struct State<T> {
    last_emission: Option<Instant>,
    waiting: Option<Waiting<T>>,
}

/// Lets the first call of a window through at once; calls arriving inside the
/// window are held until the window ends and all resolve with the latest
/// value among them.
pub struct Throttler<T> {
    scope: Scope,
    window: Duration,
    state: Arc<Mutex<State<T>>>,
}

impl<T: Clone + Send + 'static> Throttler<T> {
    /// Creates a throttler whose timers run on `scope`.
    #[must_use]
    pub fn new(scope: &Scope, window: Duration) -> Self {
        Self {
            scope: scope.clone(),
            window,
            state: Arc::new(Mutex::new(State {
                last_emission: None,
                waiting: None,
            })),
        }
    }

    /// Submits `value`.
    pub fn call(&self, value: T) -> Result<Job<T>> {
        let (completer, job) = self.scope.completable::<T>()?;
        let now = Instant::now();
        let boundary = {
            let mut state = self.state.lock();
            if let Some(waiting) = state.waiting.as_mut() {
                waiting.latest = value;
                waiting.completers.push(completer);
                return Ok(job);
            }
            let last_emission = state.last_emission;
            match last_emission {
                Some(last) if now.duration_since(last) < self.window => {
                    state.waiting = Some(Waiting {
                        latest: value,
                        completers: vec![completer],
                    });
                    last + self.window
                }
                _ => {
                    state.last_emission = Some(now);
                    drop(state);
                    completer.complete(value);
                    return Ok(job);
                }
            }
        };

        let state = Arc::clone(&self.state);
        let launched = self.scope.launch(move |cx| {
            cx.sleep(boundary.saturating_duration_since(Instant::now()))?;
            let waiting = {
                let mut state = state.lock();
                state.last_emission = Some(Instant::now());
                state.waiting.take()
            };
            if let Some(waiting) = waiting {
                for completer in waiting.completers {
                    completer.complete(waiting.latest.clone());
                }
            }
            Ok(())
        });
        if let Err(err) = launched {
            self.fail_waiting(&err);
            return Err(err);
        }
        Ok(job)
    }

    fn fail_waiting(&self, err: &Error) {
        let waiting = self.state.lock().waiting.take();
        for completer in waiting.into_iter().flat_map(|w| w.completers) {
            completer.fail(err.clone());
        }
    }
}

impl<T> std::fmt::Debug for Throttler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Throttler")
            .field("window", &self.window)
            .field("waiting", &state.waiting.as_ref().map_or(0, |w| w.completers.len()))
            .finish()
    }
}
