use super::{JobCore, JobState, WaitFor};
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::types::{CancelReason, JobId};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// A cloneable handle to a job, without access to its result.
#[derive(Clone)]
pub struct JobHandle {
    core: Arc<JobCore>,
}

impl JobHandle {
    pub(crate) fn from_core(core: Arc<JobCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<JobCore> {
        &self.core
    }

    /// The job's id within its tree.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.core.id()
    }

    /// Current lifecycle state of the job's own unit.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.core.phase()
    }

    /// True while the job is pending or running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state(), JobState::Pending | JobState::Running)
    }

    /// True once the job's own unit has finished and all of its children are done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// True if the job was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == JobState::Cancelled
    }

    /// True if the job's body completed successfully.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state() == JobState::Completed
    }

    /// True if the job's body failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state() == JobState::Failed
    }

    /// The stored failure cause, if the job failed.
    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        self.core.failure()
    }

    /// The cancellation reason, if the job was cancelled.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.core.cancel_reason()
    }

    /// Ids of the job's children that are not yet done.
    #[must_use]
    pub fn children(&self) -> Vec<JobId> {
        self.core.tree().children(self.id())
    }

    /// Cancels the job and, first, all of its children.
    ///
    /// A no-op for a job that is already done.
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::default());
    }

    /// Cancels the job with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.core.tree().cancel(self.id(), &reason);
    }

    /// Blocks until the job is done and returns its own outcome.
    ///
    /// Fails with the job's failure cause, or with [`Error::Cancelled`] if the
    /// job was cancelled or the waiting job is cancelled while it waits.
    pub fn wait(&self) -> Result<()> {
        self.core.wait(WaitFor::Done, None)?;
        self.core.outcome()
    }

    /// Like [`wait`](Self::wait), failing with [`Error::Timeout`] after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        self.core.wait(WaitFor::Done, Some(timeout))?;
        self.core.outcome()
    }

    /// Waits for the job's own unit only, not for its children.
    pub fn wait_unit(&self) -> Result<()> {
        self.core.wait(WaitFor::Unit, None)?;
        self.core.outcome()
    }

    /// Sets the completion callback, replacing any earlier one.
    ///
    /// The callback runs exactly once, when the job becomes done, whether it
    /// completed, failed or was cancelled. If the job is already done it runs
    /// immediately on the calling thread.
    pub fn on_complete(&self, callback: impl FnOnce(&JobHandle) + Send + 'static) {
        self.core.set_on_complete(Box::new(callback));
    }

    /// Sets the job's exception handler, replacing any earlier one.
    ///
    /// Children launched afterwards inherit it unless they set their own.
    pub fn on_exception(&self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        self.core.set_handler(Arc::new(handler));
    }

    /// Launches a child job on this job's scope dispatcher.
    ///
    /// Fails with [`Error::IllegalState`] if this job is cancelling or done.
    pub fn launch_child<F>(&self, body: F) -> Result<JobHandle>
    where
        F: FnOnce(&Cx) -> Result<()> + Send + 'static,
    {
        self.core
            .scope()
            .start_job(Some(self.id()), Box::new(body), false)
    }

    /// Launches a child job that produces a value.
    pub fn spawn_child<T, F>(&self, body: F) -> Result<Job<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Cx) -> Result<T> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let body = Job::wrap(Arc::clone(&slot), body);
        let handle = self.core.scope().start_job(Some(self.id()), body, false)?;
        Ok(Job::new(handle, slot))
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("done", &self.is_done())
            .finish()
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for JobHandle {}

/// A job that produces a value of type `T`.
///
/// Dereferences to its [`JobHandle`] for cancellation and inspection.
pub struct Job<T> {
    handle: JobHandle,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T: Send + 'static> Job<T> {
    pub(crate) fn new(handle: JobHandle, slot: Arc<Mutex<Option<T>>>) -> Self {
        Self { handle, slot }
    }

    /// Erases a typed body into one that stores its value in `slot`.
    pub(crate) fn wrap<F>(slot: Arc<Mutex<Option<T>>>, body: F) -> super::Body
    where
        F: FnOnce(&Cx) -> Result<T> + Send + 'static,
    {
        Box::new(move |cx: &Cx| {
            let value = body(cx)?;
            *slot.lock() = Some(value);
            Ok(())
        })
    }
}

impl<T> Job<T> {
    /// Returns a cloneable handle to this job.
    #[must_use]
    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    /// Blocks until the job is done and returns its value.
    ///
    /// Re-raises the job's failure, or [`Error::Cancelled`] if the job (or the
    /// joining job) was cancelled.
    pub fn join(self) -> Result<T> {
        self.handle.core.wait(WaitFor::Done, None)?;
        self.take()
    }

    /// Like [`join`](Self::join), failing with [`Error::Timeout`] after `timeout`.
    ///
    /// The job keeps running after a timeout; cancel it through a handle
    /// taken beforehand if it should stop.
    pub fn join_timeout(self, timeout: Duration) -> Result<T> {
        self.handle.core.wait(WaitFor::Done, Some(timeout))?;
        self.take()
    }

    /// Returns the value if the job is already done, without blocking.
    pub fn try_join(self) -> std::result::Result<Result<T>, Self> {
        if self.handle.is_done() {
            Ok(self.take())
        } else {
            Err(self)
        }
    }

    fn take(&self) -> Result<T> {
        self.handle.core.outcome()?;
        self.slot
            .lock()
            .take()
            .ok_or(Error::IllegalState("job result already taken"))
    }
}

impl<T> Deref for Job<T> {
    type Target = JobHandle;

    fn deref(&self) -> &JobHandle {
        &self.handle
    }
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Job").field(&self.handle).finish()
    }
}

/// The write side of a body-less job, created with
/// [`Scope::completable`](crate::Scope::completable).
///
/// The first of `complete`, `fail` or a cancellation wins; later calls are
/// ignored and report `false`.
pub struct Completer<T> {
    handle: JobHandle,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Completer<T> {
    pub(crate) fn new(handle: JobHandle, slot: Arc<Mutex<Option<T>>>) -> Self {
        Self { handle, slot }
    }

    /// Completes the job with `value`.
    pub fn complete(&self, value: T) -> bool {
        let Some(settled) = self.handle.core.claim(Ok(())) else {
            return false;
        };
        let accepted = settled.accepted();
        if accepted {
            *self.slot.lock() = Some(value);
        }
        settled.publish();
        accepted
    }

    /// Fails the job with `error`.
    pub fn fail(&self, error: Error) -> bool {
        let Some(settled) = self.handle.core.claim(Err(error)) else {
            return false;
        };
        let accepted = settled.accepted();
        settled.publish();
        accepted
    }

    /// Settles the job from a result.
    pub fn settle(&self, result: Result<T>) -> bool {
        match result {
            Ok(value) => self.complete(value),
            Err(error) => self.fail(error),
        }
    }

    /// The job this completer settles.
    #[must_use]
    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    /// True once the job has been settled or cancelled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.handle.core.is_unit_finished()
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Completer").field(&self.handle).finish()
    }
}
