//! The capability context handed to job bodies.

use super::CancelToken;
use crate::error::{Error, Result};
use crate::job::{Job, JobHandle};
use crate::scope::Scope;
use crate::types::{CancelReason, JobId};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

thread_local! {
    static CURRENT: RefCell<Option<Cx>> = const { RefCell::new(None) };
    static RUNNING: RefCell<Option<RunningSlot>> = const { RefCell::new(None) };
}

/// Shows which job a thread is running to other threads.
pub(crate) type RunningSlot = Arc<Mutex<Option<JobHandle>>>;

/// The context of a running job.
///
/// Every body receives a `&Cx`. Long-running bodies call
/// [`checkpoint`](Self::checkpoint) between steps so cancellation takes
/// effect; the blocking operations of this crate (sleep, channel
/// send/receive, join) observe it on their own.
///
/// ```ignore
/// scope.launch(|cx| {
///     for chunk in work {
///         cx.checkpoint()?;
///         process(chunk);
///     }
///     Ok(())
/// })?;
/// ```
#[derive(Clone)]
pub struct Cx {
    job: JobHandle,
}

impl Cx {
    pub(crate) fn new(job: JobHandle) -> Self {
        Self { job }
    }

    /// The context of the job running on the current thread, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// The id of the running job.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    /// A handle to the running job.
    #[must_use]
    pub fn job(&self) -> &JobHandle {
        &self.job
    }

    /// The scope the running job was launched in.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        self.job.core().scope()
    }

    pub(crate) fn token(&self) -> &CancelToken {
        self.job.core().token()
    }

    /// Returns true once cancellation of this job has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.token().is_cancelled()
    }

    /// The cancellation reason, once requested.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.token().reason()
    }

    /// Returns another job's outcome as this job's own. A failure in it was
    /// already delivered by that job, so this job's handler is skipped for it.
    pub(crate) fn relay<T>(&self, outcome: Result<T>) -> Result<T> {
        if outcome.is_err() {
            self.job.core().relay_failure();
        }
        outcome
    }

    /// Fails with [`Error::Cancelled`] if cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        match self.token().reason() {
            Some(reason) => Err(Error::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Sleeps for `duration`, waking early with [`Error::Cancelled`] if the
    /// job is cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.token().sleep(duration).map_err(Error::Cancelled)
    }

    /// Launches a child of the running job.
    pub fn launch_child<F>(&self, body: F) -> Result<JobHandle>
    where
        F: FnOnce(&Self) -> Result<()> + Send + 'static,
    {
        self.job.launch_child(body)
    }

    /// Launches a value-producing child of the running job.
    pub fn spawn_child<T, F>(&self, body: F) -> Result<Job<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
    {
        self.job.spawn_child(body)
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("job", &self.job.id())
            .field("scope", &self.scope().id())
            .field("cancel_requested", &self.is_cancel_requested())
            .finish()
    }
}

/// Restores the previous current context on drop.
pub(crate) struct Entered {
    previous: Option<Cx>,
}

/// Installs `cx` as the current context of this thread.
pub(crate) fn enter(cx: Cx) -> Entered {
    show_running(Some(&cx));
    let previous = CURRENT.with(|current| current.borrow_mut().replace(cx));
    Entered { previous }
}

impl Drop for Entered {
    fn drop(&mut self) {
        let previous = self.previous.take();
        show_running(previous.as_ref());
        let _ = CURRENT.try_with(|current| *current.borrow_mut() = previous);
    }
}

/// Makes every job entered on this thread visible through `slot`, until
/// [`hide_running`] is called.
pub(crate) fn publish_running(slot: RunningSlot) {
    RUNNING.with(|running| *running.borrow_mut() = Some(slot));
}

/// Stops publishing this thread's jobs.
pub(crate) fn hide_running() {
    let _ = RUNNING.try_with(|running| running.borrow_mut().take());
}

fn show_running(cx: Option<&Cx>) {
    let _ = RUNNING.try_with(|running| {
        if let Some(slot) = running.borrow().as_ref() {
            *slot.lock() = cx.map(|cx| cx.job().clone());
        }
    });
}

/// The cancel token of the job running on this thread, if any.
pub(crate) fn current_token() -> Option<CancelToken> {
    CURRENT
        .try_with(|current| current.borrow().as_ref().map(|cx| cx.token().clone()))
        .ok()
        .flatten()
}
