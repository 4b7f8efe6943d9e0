//! Running a body under a modified context.

use crate::cx::Cx;
use crate::error::Result;
use crate::job::Job;
use crate::scope::{Context, Scope};

/// Runs `body` in a child scope of `scope` whose context is merged with
/// `context`, so the body and everything it launches use the new dispatcher,
/// name or exception handler.
///
/// The derived scope closes once the body's job is done.
pub fn with_context<T, F>(scope: &Scope, context: &Context, body: F) -> Result<Job<T>>
where
    T: Send + 'static,
    F: FnOnce(&Cx) -> Result<T> + Send + 'static,
{
    let derived = scope.plus(context);
    let job = match derived.spawn(body) {
        Ok(job) => job,
        Err(err) => {
            derived.close();
            return Err(err);
        }
    };
    job.core().add_done_hook(Box::new(move || derived.close()));
    Ok(job)
}
