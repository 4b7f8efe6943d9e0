//! Jobs: cancellable, awaitable handles to units of work.
//!
//! A job's lifecycle is `Pending → Running → {Completed | Failed | Cancelled}`
//! and never regresses. A job is *done* once its own unit has finished and
//! every child is done; [`Job::join`] and [`JobHandle::wait`] block until then.
//!
//! # Handles
//!
//! - [`Job<T>`] owns the result and is consumed by `join`.
//! - [`JobHandle`] is the cloneable, result-less view used to cancel, inspect
//!   and wait.
//! - [`Completer<T>`] completes a body-less job from the outside.

mod shared;
mod handle;
pub(crate) mod tree;

pub use handle::{Completer, Job, JobHandle};

pub(crate) use shared::{JobCore, WaitFor};

use crate::cx::{self, Cx};
use crate::error::{Error, Result};
use crate::runtime::Unit;
use crate::types::CancelReason;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Handler for failures that escape a job body.
pub type ExceptionHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// A type-erased job body.
pub(crate) type Body = Box<dyn FnOnce(&Cx) -> Result<()> + Send>;

/// The lifecycle state of a job's own unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Created, not yet picked up by its dispatcher.
    Pending,
    /// The body is executing.
    Running,
    /// The body returned successfully.
    Completed,
    /// The body failed; the cause is available via [`JobHandle::failure`].
    Failed,
    /// The job was cancelled before or while running.
    Cancelled,
}

impl JobState {
    /// Returns true for `Completed`, `Failed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Wraps a job body into a dispatchable unit.
pub(crate) fn make_unit(core: Arc<JobCore>, body: Body) -> Unit {
    let guard = RunGuard { core: Some(core) };
    Box::new(move || guard.run(body))
}

/// Owns a job's claim to run. Dropping it unrun (a pool discarding queued
/// work) cancels the job so nothing waits on it forever.
struct RunGuard {
    core: Option<Arc<JobCore>>,
}

impl RunGuard {
    fn run(mut self, body: Body) {
        if let Some(core) = self.core.take() {
            execute(&core, body);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            core.tree().cancel(core.id(), &CancelReason::shutdown());
        }
    }
}

fn execute(core: &Arc<JobCore>, body: Body) {
    if !core.start() {
        return;
    }
    let cx = Cx::new(JobHandle::from_core(Arc::clone(core)));
    let outcome = {
        let _entered = cx::enter(cx.clone());
        panic::catch_unwind(AssertUnwindSafe(|| body(&cx)))
            .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(&*payload))))
    };
    core.settle(outcome);
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert_eq!(JobState::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn panic_messages() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
