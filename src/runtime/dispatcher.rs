//! The dispatcher abstraction and its stateless variants.

use crate::error::RejectReason;
use crate::tracing_compat::warn;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A unit of work handed to a dispatcher.
pub type Unit = Box<dyn FnOnce() + Send + 'static>;

/// Decides where and how units of work execute.
pub trait Dispatcher: Send + Sync + 'static {
    /// Submits a unit. A refused unit is handed back inside [`Rejected`].
    fn dispatch(&self, unit: Unit) -> Result<(), Rejected>;

    /// A short name for diagnostics.
    fn name(&self) -> &str;

    /// Whether a unit dispatched from the current thread can run while the
    /// current thread blocks. False for dispatchers that would run it on, or
    /// queue it behind, the caller.
    fn runs_beside_caller(&self) -> bool {
        true
    }
}

/// A unit refused by a dispatcher, returned with the reason.
pub struct Rejected {
    reason: RejectReason,
    unit: Unit,
}

impl Rejected {
    pub(crate) fn new(reason: RejectReason, unit: Unit) -> Self {
        Self { reason, unit }
    }

    /// Why the unit was refused.
    #[must_use]
    pub fn reason(&self) -> RejectReason {
        self.reason
    }

    /// Recovers the refused unit.
    #[must_use]
    pub fn into_unit(self) -> Unit {
        self.unit
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit rejected: {}", self.reason)
    }
}

impl std::error::Error for Rejected {}

/// Spawns a named OS thread running `unit`, handing the unit back if the
/// thread could not be created.
pub(crate) fn spawn_thread(name: String, unit: Unit) -> Result<(), Unit> {
    let slot = Arc::new(Mutex::new(Some(unit)));
    let thread_slot = Arc::clone(&slot);
    let spawned = std::thread::Builder::new().name(name).spawn(move || {
        let unit = thread_slot.lock().take();
        if let Some(unit) = unit {
            unit();
        }
    });
    match spawned {
        Ok(_) => Ok(()),
        Err(err) => {
            warn!(error = %err, "failed to spawn thread");
            slot.lock().take().map_or(Ok(()), Err)
        }
    }
}

/// Runs every unit on a fresh OS thread. Unbounded.
#[derive(Debug)]
pub struct ThreadPerTask {
    name: String,
    counter: AtomicU64,
    shut_down: AtomicBool,
}

impl Default for ThreadPerTask {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPerTask {
    /// Creates the dispatcher; threads are named `task-<n>`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix("task")
    }

    /// Creates the dispatcher with a thread name prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name: prefix.into(),
            counter: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Refuses all further units. Running threads are unaffected.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    /// Returns true after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Dispatcher for ThreadPerTask {
    fn dispatch(&self, unit: Unit) -> Result<(), Rejected> {
        if self.is_shutdown() {
            return Err(Rejected::new(RejectReason::Shutdown, unit));
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        spawn_thread(format!("{}-{n}", self.name), unit)
            .map_err(|unit| Rejected::new(RejectReason::QueueFull, unit))
    }

    fn name(&self) -> &str {
        "thread-per-task"
    }
}

/// Runs every unit immediately on the submitting thread.
#[derive(Debug, Default)]
pub struct Inline {
    _private: (),
}

impl Inline {
    /// Creates the dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Dispatcher for Inline {
    fn dispatch(&self, unit: Unit) -> Result<(), Rejected> {
        unit();
        Ok(())
    }

    fn name(&self) -> &str {
        "unconfined"
    }

    fn runs_beside_caller(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn inline_runs_on_caller() {
        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        Inline::new()
            .dispatch(Box::new(move || {
                tx.send(std::thread::current().id()).expect("send");
            }))
            .expect("inline never rejects");
        assert_eq!(rx.recv().expect("recv"), caller);
    }

    #[test]
    fn thread_per_task_uses_named_threads_and_rejects_after_shutdown() {
        let dispatcher = ThreadPerTask::with_prefix("worker");
        let (tx, rx) = mpsc::channel();
        dispatcher
            .dispatch(Box::new(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send(name).expect("send");
            }))
            .expect("accepted");
        let name = rx.recv().expect("recv").expect("named thread");
        assert!(name.starts_with("worker-"));

        dispatcher.shutdown();
        let rejected = dispatcher.dispatch(Box::new(|| {})).expect_err("shut down");
        assert_eq!(rejected.reason(), RejectReason::Shutdown);
    }
}
