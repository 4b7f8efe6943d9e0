//! Scopes: lifetime boundaries for groups of jobs.
//!
//! A [`Scope`] owns a [`Context`], the jobs launched in it, the resources
//! registered with it, and its child scopes. Closing a scope is idempotent
//! and irreversible:
//!
//! 1. the scope stops accepting work,
//! 2. child scopes are closed, depth-first,
//! 3. the scope's own jobs are cancelled (each job cancels its children first),
//! 4. resources are released in registration order, each failure logged and
//!    swallowed.
//!
//! A scope is active only while it and every ancestor are open; launching on
//! an inactive scope fails with [`Error::InactiveScope`].

mod context;
mod resource;

pub use context::Context;
pub use resource::Resource;

use crate::error::{Error, Result};
use crate::job::tree::JobTree;
use crate::job::{self, Body, Completer, Job, JobHandle, WaitFor};
use crate::runtime::{registry, Dispatcher};
use crate::tracing_compat::{debug, trace, warn};
use crate::cx::Cx;
use crate::types::{CancelReason, JobId, ScopeId};
use parking_lot::Mutex;
use resource::Deferred;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

struct ScopeState {
    closed: bool,
    jobs: HashMap<JobId, JobHandle>,
    children: Vec<Arc<ScopeInner>>,
    resources: Vec<Box<dyn Resource>>,
}

struct ScopeInner {
    id: ScopeId,
    name: String,
    context: Context,
    parent: Option<Weak<ScopeInner>>,
    tree: Arc<JobTree>,
    active: AtomicBool,
    state: Mutex<ScopeState>,
}

impl ScopeInner {
    fn new(context: Context, parent: Option<Weak<Self>>, tree: Arc<JobTree>) -> Self {
        let id = ScopeId::next();
        let name = context
            .name()
            .map_or_else(|| format!("scope-{}", id.as_u32()), str::to_string);
        debug!(scope = %id, name = %name, "scope opened");
        Self {
            id,
            name,
            context,
            parent,
            tree,
            active: AtomicBool::new(true),
            state: Mutex::new(ScopeState {
                closed: false,
                jobs: HashMap::new(),
                children: Vec::new(),
                resources: Vec::new(),
            }),
        }
    }

    fn is_active(&self) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .is_none_or(|parent| parent.is_active())
    }

    fn close(self: &Arc<Self>) {
        let (children, jobs, resources) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.active.store(false, Ordering::Release);
            (
                std::mem::take(&mut state.children),
                state.jobs.keys().copied().collect::<Vec<_>>(),
                std::mem::take(&mut state.resources),
            )
        };
        debug!(
            scope = %self.id,
            name = %self.name,
            children = children.len(),
            jobs = jobs.len(),
            resources = resources.len(),
            "closing scope"
        );

        for child in &children {
            child.close();
        }

        let reason = CancelReason::parent_cancelled().with_message("scope closed");
        self.tree.cancel_many(&jobs, &reason);

        for (index, mut resource) in resources.into_iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| resource.close())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(scope = %self.id, index, error = %err, "resource release failed");
                }
                Err(payload) => {
                    let message = job::panic_message(&*payload);
                    warn!(scope = %self.id, index, panic = %message, "resource release panicked");
                }
            }
        }

        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .state
                .lock()
                .children
                .retain(|child| !Arc::ptr_eq(child, self));
        }
        trace!(scope = %self.id, "scope closed");
    }
}

/// A lifetime boundary for a group of jobs. Cheap to clone.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Opens a root scope.
    #[must_use]
    pub fn new(context: Context) -> Self {
        Self {
            inner: Arc::new(ScopeInner::new(context, None, JobTree::new())),
        }
    }

    /// Opens a root scope on `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::new(Context::new().with_dispatcher(dispatcher))
    }

    /// The scope's id.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// The scope's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The scope's context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// True while this scope and all of its ancestors are open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Opens a child scope with the same context.
    ///
    /// A child of an inactive scope is born closed.
    #[must_use]
    pub fn child(&self) -> Self {
        self.derive(self.inner.context.clone())
    }

    /// Opens a child scope whose context is this scope's merged with `context`.
    #[must_use]
    pub fn plus(&self, context: &Context) -> Self {
        self.derive(self.inner.context.plus(context))
    }

    fn derive(&self, context: Context) -> Self {
        let child = Arc::new(ScopeInner::new(
            context,
            Some(Arc::downgrade(&self.inner)),
            Arc::clone(&self.inner.tree),
        ));
        let attached = {
            let mut state = self.inner.state.lock();
            if state.closed || !self.inner.is_active() {
                false
            } else {
                state.children.push(Arc::clone(&child));
                true
            }
        };
        if !attached {
            child.close();
        }
        Self { inner: child }
    }

    /// Launches a job.
    ///
    /// Fails with [`Error::InactiveScope`] if the scope is closed. Every other
    /// failure, including the dispatcher refusing the work, surfaces later
    /// through the job and the exception handler.
    pub fn launch<F>(&self, body: F) -> Result<JobHandle>
    where
        F: FnOnce(&Cx) -> Result<()> + Send + 'static,
    {
        self.start_job(None, Box::new(body), true)
    }

    /// Launches a job that produces a value, read back with [`Job::join`].
    pub fn spawn<T, F>(&self, body: F) -> Result<Job<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Cx) -> Result<T> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let handle = self.start_job(None, Job::wrap(Arc::clone(&slot), body), true)?;
        Ok(Job::new(handle, slot))
    }

    /// Creates a body-less job in this scope, settled through the returned
    /// [`Completer`].
    pub fn completable<T: Send + 'static>(&self) -> Result<(Completer<T>, Job<T>)> {
        if !self.is_active() {
            return Err(self.inactive());
        }
        let core = self.inner.tree.create(
            None,
            self.clone(),
            self.inner.context.exception_handler().cloned(),
        )?;
        let handle = JobHandle::from_core(core);
        if !self.track(&handle) {
            handle.cancel_with(CancelReason::parent_cancelled());
            return Err(self.inactive());
        }
        let slot = Arc::new(Mutex::new(None));
        Ok((
            Completer::new(handle.clone(), Arc::clone(&slot)),
            Job::new(handle, slot),
        ))
    }

    pub(crate) fn start_job(
        &self,
        parent: Option<JobId>,
        body: Body,
        track: bool,
    ) -> Result<JobHandle> {
        if !self.is_active() {
            return Err(self.inactive());
        }
        let core = self.inner.tree.create(
            parent,
            self.clone(),
            self.inner.context.exception_handler().cloned(),
        )?;
        let handle = JobHandle::from_core(Arc::clone(&core));
        if track && !self.track(&handle) {
            handle.cancel_with(CancelReason::parent_cancelled());
            return Err(self.inactive());
        }

        let dispatcher = match self.dispatcher() {
            Ok(dispatcher) => dispatcher,
            Err(err) => {
                core.settle(Err(err));
                return Ok(handle);
            }
        };
        trace!(
            scope = %self.inner.id,
            job = %handle.id(),
            dispatcher = dispatcher.name(),
            "launching job"
        );
        if let Err(rejected) = dispatcher.dispatch(job::make_unit(core, body)) {
            let reason = rejected.reason();
            warn!(
                scope = %self.inner.id,
                job = %handle.id(),
                dispatcher = dispatcher.name(),
                reason = %reason,
                "job rejected by dispatcher"
            );
            handle.core().settle(Err(Error::Rejected(reason)));
        }
        Ok(handle)
    }

    /// Records `handle` as one of this scope's jobs until it is done.
    fn track(&self, handle: &JobHandle) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return false;
            }
            state.jobs.insert(handle.id(), handle.clone());
        }
        let scope = Arc::downgrade(&self.inner);
        let id = handle.id();
        handle.core().add_done_hook(Box::new(move || {
            if let Some(scope) = scope.upgrade() {
                scope.state.lock().jobs.remove(&id);
            }
        }));
        true
    }

    /// The dispatcher jobs run on: the context's, or the process-wide default.
    pub(crate) fn dispatcher(&self) -> Result<Arc<dyn Dispatcher>> {
        match self.inner.context.dispatcher() {
            Some(dispatcher) => Ok(Arc::clone(dispatcher)),
            None => Ok(registry::global()?.default_dispatcher()),
        }
    }

    fn inactive(&self) -> Error {
        Error::InactiveScope {
            scope: self.inner.id,
        }
    }

    /// Closes the scope. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Alias for [`close`](Self::close).
    pub fn cancel(&self) {
        self.close();
    }

    /// Number of tracked jobs that are not yet done.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    /// Handles to the tracked jobs that are not yet done.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobHandle> {
        self.inner.state.lock().jobs.values().cloned().collect()
    }

    /// Number of open child scopes.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.state.lock().children.len()
    }

    /// Number of jobs in this scope tree that are not yet done, children
    /// included.
    #[must_use]
    pub fn live_jobs(&self) -> usize {
        self.inner.tree.len()
    }

    /// Registers a resource to release when the scope closes.
    ///
    /// On a closed scope the resource is released immediately and
    /// [`Error::InactiveScope`] is returned.
    pub fn add_resource(&self, resource: impl Resource) -> Result<()> {
        let mut resource: Box<dyn Resource> = Box::new(resource);
        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state.resources.push(resource);
                return Ok(());
            }
        }
        if let Err(err) = resource.close() {
            warn!(scope = %self.inner.id, error = %err, "resource release failed");
        }
        Err(self.inactive())
    }

    /// Registers a closure to run when the scope closes.
    pub fn defer(&self, action: impl FnOnce() -> Result<()> + Send + 'static) -> Result<()> {
        self.add_resource(Deferred::new(action))
    }

    /// Waits until every job tracked right now is done.
    ///
    /// Job failures are not reported here; only a cancellation of the
    /// waiting job interrupts the wait.
    pub fn join_all(&self) -> Result<()> {
        for job in self.jobs() {
            job.core().wait(WaitFor::Done, None)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("active", &self.is_active())
            .finish()
    }
}
