//! Shared per-job state.

use super::tree::JobTree;
use super::{ExceptionHandler, JobHandle, JobState};
use crate::cx::{self, CancelToken, Wake};
use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::tracing_compat::{error, trace};
use crate::types::{CancelReason, JobId};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) type CompletionCallback = Box<dyn FnOnce(&JobHandle) + Send>;
pub(crate) type DoneHook = Box<dyn FnOnce() + Send>;

pub(crate) struct CoreState {
    phase: JobState,
    failure: Option<Error>,
    cancel_reason: Option<CancelReason>,
    unit_finished: bool,
    done: bool,
    /// The failure about to be recorded was already delivered by another job.
    relayed: bool,
    handler: Option<ExceptionHandler>,
    on_complete: Option<CompletionCallback>,
    done_hooks: SmallVec<[DoneHook; 2]>,
}

/// The state of one job, shared by its handles, its running unit and its
/// tree node.
pub(crate) struct JobCore {
    id: JobId,
    tree: Arc<JobTree>,
    scope: Scope,
    inherited_handler: Option<ExceptionHandler>,
    token: CancelToken,
    state: Mutex<CoreState>,
    changed: Condvar,
}

/// Which condition a waiter is waiting for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WaitFor {
    /// The job and all of its children are done.
    Done,
    /// Only the job's own unit has finished.
    Unit,
}

impl JobCore {
    pub(crate) fn new(
        id: JobId,
        tree: Arc<JobTree>,
        scope: Scope,
        inherited_handler: Option<ExceptionHandler>,
    ) -> Self {
        Self {
            id,
            tree,
            scope,
            inherited_handler,
            token: CancelToken::new(),
            state: Mutex::new(CoreState {
                phase: JobState::Pending,
                failure: None,
                cancel_reason: None,
                unit_finished: false,
                done: false,
                relayed: false,
                handler: None,
                on_complete: None,
                done_hooks: SmallVec::new(),
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn tree(&self) -> &Arc<JobTree> {
        &self.tree
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn token(&self) -> &CancelToken {
        &self.token
    }

    pub(crate) fn phase(&self) -> JobState {
        self.state.lock().phase
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state.lock().done
    }

    pub(crate) fn is_unit_finished(&self) -> bool {
        self.state.lock().unit_finished
    }

    pub(crate) fn failure(&self) -> Option<Error> {
        self.state.lock().failure.clone()
    }

    pub(crate) fn cancel_reason(&self) -> Option<CancelReason> {
        self.state.lock().cancel_reason.clone()
    }

    /// The handler a failure of this job (or a new child) is delivered to.
    pub(crate) fn effective_handler(&self) -> Option<ExceptionHandler> {
        self.state
            .lock()
            .handler
            .clone()
            .or_else(|| self.inherited_handler.clone())
    }

    pub(crate) fn set_handler(&self, handler: ExceptionHandler) {
        self.state.lock().handler = Some(handler);
    }

    /// Marks the failure this unit is about to report as relayed from another
    /// job whose handler already saw it. The job still fails with it; the
    /// handler is not called again.
    pub(crate) fn relay_failure(&self) {
        self.state.lock().relayed = true;
    }

    /// Claims the unit for execution. Fails if the job was cancelled or
    /// settled before it started.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase == JobState::Pending && !state.unit_finished {
            state.phase = JobState::Running;
            true
        } else {
            false
        }
    }

    /// Records the outcome of the job's own unit.
    ///
    /// The first outcome wins; a job cancelled while running keeps its
    /// cancelled state and the outcome is discarded. Returns whether the
    /// outcome was recorded.
    pub(crate) fn settle(self: &Arc<Self>, outcome: Result<()>) -> bool {
        let Some(settled) = self.claim(outcome) else {
            return false;
        };
        settled.publish();
        true
    }

    /// First half of [`settle`](Self::settle): records the outcome without
    /// completing the job, so a result value can be stored before anyone
    /// observes the job as done.
    pub(crate) fn claim(self: &Arc<Self>, outcome: Result<()>) -> Option<Settled> {
        let (accepted, failure) = {
            let mut state = self.state.lock();
            if state.unit_finished {
                return None;
            }
            state.unit_finished = true;
            let mut failure = None;
            let accepted = match state.phase {
                JobState::Pending | JobState::Running => {
                    match outcome {
                        Ok(()) => state.phase = JobState::Completed,
                        Err(Error::Cancelled(reason)) => {
                            state.phase = JobState::Cancelled;
                            state.cancel_reason = Some(reason);
                        }
                        Err(Error::FlowAborted) => {
                            state.phase = JobState::Cancelled;
                            state.cancel_reason = Some(CancelReason::default());
                        }
                        Err(err) => {
                            state.phase = JobState::Failed;
                            state.failure = Some(err.clone());
                            if !state.relayed {
                                failure = Some(err);
                            }
                        }
                    }
                    true
                }
                _ => false,
            };
            self.changed.notify_all();
            (accepted, failure)
        };
        Some(Settled {
            core: Arc::clone(self),
            accepted,
            failure,
        })
    }

    /// Cancels this job's own execution (not its children): moves the job to
    /// `Cancelled` and flags its token. Waking the token is left to the caller.
    ///
    /// Returns `None` if the unit had already settled, otherwise whether the
    /// unit had not started. An unstarted unit is finished by this call and
    /// the caller must report that to the tree.
    pub(crate) fn request_cancel(&self, reason: CancelReason) -> Option<bool> {
        let claimed = {
            let mut state = self.state.lock();
            match state.phase {
                JobState::Pending if !state.unit_finished => {
                    state.phase = JobState::Cancelled;
                    state.cancel_reason = Some(reason.clone());
                    state.unit_finished = true;
                    self.changed.notify_all();
                    true
                }
                JobState::Running => {
                    state.phase = JobState::Cancelled;
                    state.cancel_reason = Some(reason.clone());
                    false
                }
                _ => return None,
            }
        };
        self.token.request(reason);
        Some(claimed)
    }

    /// Marks the job done and fires its hooks and completion callback, once.
    ///
    /// Internal hooks run before waiters are released, so bookkeeping such as
    /// scope tracking is settled by the time `join` returns.
    pub(crate) fn mark_done(self: &Arc<Self>) {
        let callback = loop {
            let hooks = {
                let mut state = self.state.lock();
                if state.done {
                    return;
                }
                if state.done_hooks.is_empty() {
                    state.done = true;
                    self.changed.notify_all();
                    break state.on_complete.take();
                }
                std::mem::take(&mut state.done_hooks)
            };
            for hook in hooks {
                hook();
            }
        };
        trace!(job = %self.id, "job done");
        if let Some(callback) = callback {
            callback(&JobHandle::from_core(Arc::clone(self)));
        }
    }

    /// Installs the completion callback, replacing any previous one. Runs it
    /// immediately if the job is already done.
    pub(crate) fn set_on_complete(self: &Arc<Self>, callback: CompletionCallback) {
        {
            let mut state = self.state.lock();
            if !state.done {
                state.on_complete = Some(callback);
                return;
            }
        }
        callback(&JobHandle::from_core(Arc::clone(self)));
    }

    /// Adds an internal hook run when the job becomes done. Runs it
    /// immediately if the job is already done.
    pub(crate) fn add_done_hook(&self, hook: DoneHook) {
        {
            let mut state = self.state.lock();
            if !state.done {
                state.done_hooks.push(hook);
                return;
            }
        }
        hook();
    }

    /// Blocks until the condition holds.
    ///
    /// The wait is interrupted if the job running on the calling thread is
    /// cancelled. Fails with [`Error::Timeout`] once `timeout` elapses.
    pub(crate) fn wait(self: &Arc<Self>, what: WaitFor, timeout: Option<Duration>) -> Result<()> {
        let token = cx::current_token();
        let _hook = token.as_ref().map(|token| {
            let core = Arc::clone(self);
            token.on_cancel(move || {
                let _state = core.state.lock();
                core.changed.notify_all();
            })
        });
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        let wake = cx::wait_until(
            &mut state,
            &self.changed,
            token.as_ref(),
            deadline,
            |state| match what {
                WaitFor::Done => state.done,
                WaitFor::Unit => state.unit_finished,
            },
        );
        match wake {
            Wake::Ready => Ok(()),
            Wake::TimedOut => Err(Error::Timeout {
                after: timeout.unwrap_or_default(),
            }),
            Wake::Cancelled(reason) => Err(Error::Cancelled(reason)),
        }
    }

    /// The job's own outcome, as reported by `join`.
    pub(crate) fn outcome(&self) -> Result<()> {
        let state = self.state.lock();
        match state.phase {
            JobState::Completed => Ok(()),
            JobState::Failed => Err(state
                .failure
                .clone()
                .unwrap_or(Error::IllegalState("failed job has no recorded cause"))),
            JobState::Cancelled => Err(Error::Cancelled(
                state.cancel_reason.clone().unwrap_or_default(),
            )),
            JobState::Pending | JobState::Running => {
                Err(Error::IllegalState("job has not finished"))
            }
        }
    }

    fn deliver_failure(&self, failure: &Error) {
        match self.effective_handler() {
            Some(handler) => handler(failure),
            None => error!(job = %self.id, error = %failure, "uncaught job failure"),
        }
    }
}

/// An outcome recorded by [`JobCore::claim`] but not yet published.
pub(crate) struct Settled {
    core: Arc<JobCore>,
    accepted: bool,
    failure: Option<Error>,
}

impl Settled {
    /// Whether this outcome is the job's outcome.
    pub(crate) fn accepted(&self) -> bool {
        self.accepted
    }

    /// Delivers a failure to its handler and reports the finished unit to
    /// the tree.
    pub(crate) fn publish(self) {
        if let Some(failure) = &self.failure {
            self.core.deliver_failure(failure);
        }
        trace!(job = %self.core.id, accepted = self.accepted, "job unit finished");
        self.core.tree.mark_finished(self.core.id);
    }
}
