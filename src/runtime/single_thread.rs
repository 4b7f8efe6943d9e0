//! A dispatcher bound to one dedicated thread.
//!
//! Units run in submission order on a single thread, the stand-in for a UI or
//! event-loop thread. Submission is lock-free: units go onto a
//! [`SegQueue`] and the thread is unparked.

use super::{Dispatcher, Rejected, Unit};
use crate::error::RejectReason;
use crate::job::panic_message;
use crate::tracing_compat::{debug, error};
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread, ThreadId};

struct Shared {
    queue: SegQueue<Unit>,
    shut_down: AtomicBool,
}

/// Runs units FIFO on one dedicated thread.
pub struct SingleThreadDispatcher {
    name: String,
    shared: Arc<Shared>,
    thread: Thread,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SingleThreadDispatcher {
    /// Starts the dispatch thread.
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            queue: SegQueue::new(),
            shut_down: AtomicBool::new(false),
        });
        let worker = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(&worker))?;
        let thread = join.thread().clone();
        debug!(dispatcher = %name, "single-thread dispatcher started");
        Ok(Self {
            name,
            shared,
            thread,
            join: Mutex::new(Some(join)),
        })
    }

    /// Returns true when called from the dispatch thread.
    #[must_use]
    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread.id()
    }

    /// The dispatch thread's id.
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }

    /// Units waiting to run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Refuses further units, lets the queued ones run, and waits for the
    /// thread to exit (unless called from the dispatch thread itself).
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.thread.unpark();
        if self.is_dispatch_thread() {
            return;
        }
        if let Some(join) = self.join.lock().take() {
            if join.join().is_err() {
                error!(dispatcher = %self.name, "dispatch thread panicked");
            }
        }
        debug!(dispatcher = %self.name, "single-thread dispatcher stopped");
    }

    /// Returns true after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }
}

impl Dispatcher for SingleThreadDispatcher {
    fn dispatch(&self, unit: Unit) -> Result<(), Rejected> {
        if self.is_shutdown() {
            return Err(Rejected::new(RejectReason::Shutdown, unit));
        }
        self.shared.queue.push(unit);
        self.thread.unpark();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn runs_beside_caller(&self) -> bool {
        !self.is_dispatch_thread()
    }
}

impl Drop for SingleThreadDispatcher {
    fn drop(&mut self) {
        self.shared.shut_down.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

impl std::fmt::Debug for SingleThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadDispatcher")
            .field("name", &self.name)
            .field("queued", &self.queued())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn run(shared: &Shared) {
    loop {
        while let Some(unit) = shared.queue.pop() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(unit)) {
                error!(panic = %panic_message(&*payload), "unit panicked on dispatch thread");
            }
        }
        if shared.shut_down.load(Ordering::Acquire) && shared.queue.is_empty() {
            return;
        }
        thread::park();
    }
}
