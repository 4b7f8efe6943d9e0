//! Process-wide dispatchers.
//!
//! The registry is created lazily by the first [`global`] call, or explicitly
//! with [`init`] when the embedding application wants a specific
//! [`RuntimeConfig`]. [`shutdown`] tears it down exactly once; afterwards
//! [`global`] fails until [`init`] is called again.

use super::{
    Dispatcher, Inline, PoolDispatcher, SingleThreadDispatcher, ThreadPerTask, WorkerPool,
};
use crate::config::RuntimeConfig;
use crate::error::{Error, RejectReason, Result};
use crate::tracing_compat::info;
use parking_lot::{const_mutex, Mutex};
use std::sync::Arc;

enum Slot {
    Uninit,
    Live(Arc<Dispatchers>),
    Shutdown,
}

static REGISTRY: Mutex<Slot> = const_mutex(Slot::Uninit);

/// The standard set of dispatchers.
#[derive(Debug)]
pub struct Dispatchers {
    config: RuntimeConfig,
    default: Arc<PoolDispatcher>,
    io: Arc<PoolDispatcher>,
    main: Arc<SingleThreadDispatcher>,
    unconfined: Arc<Inline>,
    thread_per_task: Arc<ThreadPerTask>,
}

impl Dispatchers {
    fn start(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let prefix = config.thread_name_prefix.clone();
        let default = WorkerPool::with_thread_prefix("default", config.pool, prefix.as_str())?;
        let io = WorkerPool::with_thread_prefix("io", config.io_pool, prefix.as_str())?;
        let main = SingleThreadDispatcher::new(format!("{prefix}-main")).map_err(Error::failed)?;
        Ok(Self {
            default: Arc::new(PoolDispatcher::new(default)),
            io: Arc::new(PoolDispatcher::new(io)),
            main: Arc::new(main),
            unconfined: Arc::new(Inline::new()),
            thread_per_task: Arc::new(ThreadPerTask::with_prefix(format!("{prefix}-task"))),
            config,
        })
    }

    /// The configuration the registry was built from.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The general-purpose pool for CPU-bound work.
    #[must_use]
    pub fn default_dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.default) as Arc<dyn Dispatcher>
    }

    /// The larger pool for blocking IO.
    #[must_use]
    pub fn io(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.io) as Arc<dyn Dispatcher>
    }

    /// The single dedicated thread.
    #[must_use]
    pub fn main(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.main) as Arc<dyn Dispatcher>
    }

    /// Runs units on the submitting thread.
    #[must_use]
    pub fn unconfined(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.unconfined) as Arc<dyn Dispatcher>
    }

    /// One OS thread per unit.
    #[must_use]
    pub fn thread_per_task(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.thread_per_task) as Arc<dyn Dispatcher>
    }

    /// The default pool, for pausing or inspecting it.
    #[must_use]
    pub fn default_pool(&self) -> &WorkerPool {
        self.default.pool()
    }

    /// The IO pool.
    #[must_use]
    pub fn io_pool(&self) -> &WorkerPool {
        self.io.pool()
    }

    /// The main-thread dispatcher.
    #[must_use]
    pub fn main_thread(&self) -> &SingleThreadDispatcher {
        &self.main
    }

    fn teardown(&self) {
        let grace = self.config.shutdown_grace();
        let default = self.default.pool().shutdown(grace);
        let io = self.io.pool().shutdown(grace);
        self.thread_per_task.shutdown();
        self.main.shutdown();
        info!(
            default_abandoned = default.abandoned,
            io_abandoned = io.abandoned,
            interrupted = default.interrupted + io.interrupted,
            "dispatchers shut down"
        );
    }
}

/// Builds the registry from `config`.
///
/// Fails with [`Error::IllegalState`] if a registry is already live. Allowed
/// again after [`shutdown`].
pub fn init(config: RuntimeConfig) -> Result<Arc<Dispatchers>> {
    let mut slot = REGISTRY.lock();
    if matches!(*slot, Slot::Live(_)) {
        return Err(Error::IllegalState("dispatcher registry already initialised"));
    }
    let dispatchers = Arc::new(Dispatchers::start(config)?);
    info!("dispatcher registry initialised");
    *slot = Slot::Live(Arc::clone(&dispatchers));
    Ok(dispatchers)
}

/// Returns the live registry, creating a default one on first use.
pub fn global() -> Result<Arc<Dispatchers>> {
    let mut slot = REGISTRY.lock();
    match &*slot {
        Slot::Live(dispatchers) => Ok(Arc::clone(dispatchers)),
        Slot::Shutdown => Err(Error::Rejected(RejectReason::Shutdown)),
        Slot::Uninit => {
            let dispatchers = Arc::new(Dispatchers::start(RuntimeConfig::default())?);
            *slot = Slot::Live(Arc::clone(&dispatchers));
            Ok(dispatchers)
        }
    }
}

/// Returns true while a registry is live.
#[must_use]
pub fn is_live() -> bool {
    matches!(*REGISTRY.lock(), Slot::Live(_))
}

/// Tears the registry down. Returns false if there was nothing to tear down.
///
/// Pools get the configured grace period; units still queued afterwards are
/// dropped, which cancels their jobs.
pub fn shutdown() -> bool {
    let previous = std::mem::replace(&mut *REGISTRY.lock(), Slot::Shutdown);
    match previous {
        Slot::Live(dispatchers) => {
            dispatchers.teardown();
            true
        }
        Slot::Uninit | Slot::Shutdown => false,
    }
}
