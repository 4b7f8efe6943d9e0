use crate::error::Result;

/// Something a scope releases when it closes.
///
/// Resources are released once, in registration order, after the scope's
/// jobs have been cancelled. A failing release is logged and does not stop
/// the others.
pub trait Resource: Send + 'static {
    /// Releases the resource.
    fn close(&mut self) -> Result<()>;
}

/// A closure registered with [`Scope::defer`](crate::Scope::defer).
pub(crate) struct Deferred<F> {
    action: Option<F>,
}

impl<F> Deferred<F> {
    pub(crate) fn new(action: F) -> Self {
        Self {
            action: Some(action),
        }
    }
}

impl<F> Resource for Deferred<F>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    fn close(&mut self) -> Result<()> {
        self.action.take().map_or(Ok(()), |action| action())
    }
}
