//! Deadlines for jobs.
//!
//! The body runs as its own job next to a watcher job. If the deadline passes
//! first the watcher fails with [`Error::Timeout`] and cancels the body with
//! [`CancelKind::Timeout`](crate::types::CancelKind::Timeout), without waiting
//! for the body to notice. Cancelling the watcher cancels the body too.

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::job::{Job, JobHandle};
use crate::scope::Scope;
use crate::tracing_compat::debug;
use crate::types::CancelReason;
use std::time::Duration;

fn watch<T: Send + 'static>(
    body: Job<T>,
    body_handle: &JobHandle,
    timeout: Duration,
) -> std::result::Result<Result<T>, Error> {
    match body.join_timeout(timeout) {
        Err(err) if !body_handle.is_done() => {
            let reason = if err.is_timeout() {
                CancelReason::timeout()
            } else {
                CancelReason::parent_cancelled()
            };
            body_handle.cancel_with(reason);
            if err.is_timeout() {
                debug!(job = %body_handle.id(), timeout_ms = timeout.as_millis() as u64, "deadline passed");
                Err(Error::Timeout { after: timeout })
            } else {
                Err(err)
            }
        }
        outcome => Ok(outcome),
    }
}

fn start_body<T, F>(scope: &Scope, body: F) -> Result<(Job<T>, JobHandle)>
where
    T: Send + 'static,
    F: FnOnce(&Cx) -> Result<T> + Send + 'static,
{
    let job = scope.spawn(body)?;
    let handle = job.handle();
    Ok((job, handle))
}

fn cancel_with_watcher<T>(watcher: &Job<T>, body: JobHandle) {
    watcher.core().add_done_hook(Box::new(move || {
        body.cancel_with(CancelReason::parent_cancelled());
    }));
}

/// Runs `body`, failing with [`Error::Timeout`] if it is not done within
/// `timeout`.
pub fn with_timeout<T, F>(scope: &Scope, timeout: Duration, body: F) -> Result<Job<T>>
where
    T: Send + 'static,
    F: FnOnce(&Cx) -> Result<T> + Send + 'static,
{
    let (body, body_handle) = start_body(scope, body)?;
    let cancel_target = body_handle.clone();
    let watcher = scope.spawn(move |cx| cx.relay(watch(body, &body_handle, timeout)?))?;
    cancel_with_watcher(&watcher, cancel_target);
    Ok(watcher)
}

/// Like [`with_timeout`], but produces `fallback()` instead of failing when
/// the deadline passes.
pub fn with_timeout_or_else<T, F, G>(
    scope: &Scope,
    timeout: Duration,
    body: F,
    fallback: G,
) -> Result<Job<T>>
where
    T: Send + 'static,
    F: FnOnce(&Cx) -> Result<T> + Send + 'static,
    G: FnOnce() -> T + Send + 'static,
{
    let (body, body_handle) = start_body(scope, body)?;
    let cancel_target = body_handle.clone();
    let watcher = scope.spawn(move |cx| match watch(body, &body_handle, timeout) {
        Ok(outcome) => cx.relay(outcome),
        Err(Error::Timeout { .. }) => Ok(fallback()),
        Err(err) => Err(err),
    })?;
    cancel_with_watcher(&watcher, cancel_target);
    Ok(watcher)
}
