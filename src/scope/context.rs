use crate::error::{Error, Result};
use crate::job::ExceptionHandler;
use crate::runtime::{registry, Dispatcher};
use std::fmt;
use std::sync::Arc;

/// What a scope runs its jobs with: a dispatcher, an exception handler for
/// failures nobody else handles, and a name for diagnostics.
///
/// Every field is optional. A scope without a dispatcher uses the
/// process-wide default pool.
#[derive(Clone, Default)]
pub struct Context {
    dispatcher: Option<Arc<dyn Dispatcher>>,
    exception_handler: Option<ExceptionHandler>,
    name: Option<String>,
}

impl Context {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `dispatcher` for jobs.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Routes uncaught job failures to `handler`.
    #[must_use]
    pub fn with_exception_handler(
        mut self,
        handler: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    /// Names the scope.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Merges two contexts; fields set in `other` win.
    #[must_use]
    pub fn plus(&self, other: &Self) -> Self {
        Self {
            dispatcher: other.dispatcher.clone().or_else(|| self.dispatcher.clone()),
            exception_handler: other
                .exception_handler
                .clone()
                .or_else(|| self.exception_handler.clone()),
            name: other.name.clone().or_else(|| self.name.clone()),
        }
    }

    /// The configured dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> Option<&Arc<dyn Dispatcher>> {
        self.dispatcher.as_ref()
    }

    /// The configured exception handler.
    #[must_use]
    pub fn exception_handler(&self) -> Option<&ExceptionHandler> {
        self.exception_handler.as_ref()
    }

    /// The configured name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// A context on the process-wide default (CPU-bound) pool.
    pub fn default_dispatcher() -> Result<Self> {
        Ok(Self::new().with_dispatcher(registry::global()?.default_dispatcher()))
    }

    /// A context on the process-wide IO pool.
    pub fn io() -> Result<Self> {
        Ok(Self::new().with_dispatcher(registry::global()?.io()))
    }

    /// A context on the process-wide single-thread dispatcher.
    pub fn main() -> Result<Self> {
        Ok(Self::new().with_dispatcher(registry::global()?.main()))
    }

    /// A context that runs jobs inline on the launching thread.
    pub fn unconfined() -> Result<Self> {
        Ok(Self::new().with_dispatcher(registry::global()?.unconfined()))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("dispatcher", &self.dispatcher.as_ref().map(|d| d.name().to_string()))
            .field("exception_handler", &self.exception_handler.is_some())
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Inline, ThreadPerTask};

    #[test]
    fn plus_prefers_right_hand_fields() {
        let left = Context::new()
            .with_dispatcher(Arc::new(Inline::new()))
            .with_name("left")
            .with_exception_handler(|_| {});
        let right = Context::new().with_dispatcher(Arc::new(ThreadPerTask::new()));

        let merged = left.plus(&right);
        assert_eq!(merged.dispatcher().map(|d| d.name()), Some("thread-per-task"));
        assert_eq!(merged.name(), Some("left"));
        assert!(merged.exception_handler().is_some());

        let merged = right.plus(&Context::new());
        assert_eq!(merged.dispatcher().map(|d| d.name()), Some("thread-per-task"));
        assert!(merged.exception_handler().is_none());
    }
}
