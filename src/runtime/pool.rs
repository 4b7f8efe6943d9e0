//! A bounded, pausable worker pool.
//!
//! # Sizing
//!
//! Submission follows the classic executor policy:
//!
//! 1. below `core_size` workers, start a worker for the unit;
//! 2. otherwise queue the unit if the queue has room;
//! 3. otherwise start an extra worker, up to `max_size`;
//! 4. otherwise reject with [`RejectReason::QueueFull`].
//!
//! Workers above `core_size` retire after `keep_alive` without work.
//!
//! # Pausing
//!
//! While paused, a worker that has taken its next unit blocks *before*
//! running it. Units already running are unaffected and nothing queued is
//! lost; [`WorkerPool::resume`] releases every stalled worker.
//!
//! # Shutdown
//!
//! [`WorkerPool::shutdown`] stops intake, resumes a paused pool, and waits up
//! to a grace period for queued and running units. Once the grace period
//! runs out, units still queued are dropped (a dropped job unit cancels its
//! job) and jobs still running are cancelled with
//! [`CancelKind::Shutdown`](crate::types::CancelKind::Shutdown). Workers exit
//! as soon as their current unit returns.

use super::dispatcher::spawn_thread;
use super::{Dispatcher, Rejected, Unit};
use crate::config::PoolConfig;
use crate::cx::{self, RunningSlot};
use crate::error::{RejectReason, Result};
use crate::job::{panic_message, JobHandle};
use crate::tracing_compat::{debug, error, info, trace, warn};
use crate::types::{CancelReason, ListenerId};
use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Receives pool lifecycle notifications.
///
/// Every method defaults to a no-op.
pub trait PoolListener: Send + Sync {
    /// The pool was paused.
    fn on_paused(&self, _pool: &str) {}
    /// The pool was resumed.
    fn on_resumed(&self, _pool: &str) {}
    /// The pool began shutting down. Listeners are dropped right after.
    fn on_shutdown(&self, _pool: &str) {}
}

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Units that finished during the grace period.
    pub completed_in_grace: u64,
    /// Queued units dropped after the grace period ran out.
    pub abandoned: usize,
    /// Running jobs cancelled after the grace period ran out.
    pub interrupted: usize,
}

/// A point-in-time view of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live worker threads.
    pub workers: usize,
    /// Workers waiting for work.
    pub idle: usize,
    /// Units taken by workers and not yet finished, including units held
    /// at the pause gate.
    pub running: usize,
    /// Units waiting in the queue.
    pub queued: usize,
    /// Units accepted so far.
    pub submitted: u64,
    /// Units finished so far.
    pub completed: u64,
    /// Units refused so far.
    pub rejected: u64,
    /// Whether the pool is paused.
    pub paused: bool,
}

struct Control {
    workers: usize,
    idle: usize,
    running: usize,
    paused: bool,
    shutdown: bool,
    report: Option<ShutdownReport>,
    spawned: u64,
}

struct PoolInner {
    name: String,
    thread_prefix: String,
    config: PoolConfig,
    queue: ArrayQueue<Unit>,
    control: Mutex<Control>,
    /// Idle workers wait here for units.
    work_cv: Condvar,
    /// Paused workers wait here.
    pause_cv: Condvar,
    /// Shutdown waits here for the pool to drain.
    drain_cv: Condvar,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn PoolListener>)>>,
    /// One slot per live worker, holding the job it is running.
    running_jobs: Mutex<Vec<RunningSlot>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
}

/// A bounded-queue thread pool whose intake can be paused and resumed.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates a pool. No threads start until the first submission.
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Result<Self> {
        Self::with_thread_prefix(name, config, "scopeline")
    }

    /// Creates a pool whose worker threads are named `<prefix>-<name>-<n>`.
    pub fn with_thread_prefix(
        name: impl Into<String>,
        config: PoolConfig,
        thread_prefix: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        debug!(
            pool = %name,
            core = config.core_size,
            max = config.max_size,
            queue = config.queue_capacity,
            "worker pool created"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                thread_prefix: thread_prefix.into(),
                queue: ArrayQueue::new(config.queue_capacity),
                config,
                control: Mutex::new(Control {
                    workers: 0,
                    idle: 0,
                    running: 0,
                    paused: false,
                    shutdown: false,
                    report: None,
                    spawned: 0,
                }),
                work_cv: Condvar::new(),
                pause_cv: Condvar::new(),
                drain_cv: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                running_jobs: Mutex::new(Vec::new()),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        })
    }

    /// The pool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The sizing policy.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Submits a unit; never blocks.
    pub fn submit(&self, unit: Unit) -> std::result::Result<(), Rejected> {
        let inner = &self.inner;
        let mut control = inner.control.lock();
        if control.shutdown {
            drop(control);
            return Err(inner.reject(RejectReason::Shutdown, unit));
        }

        let unit = if control.workers < inner.config.core_size {
            unit
        } else {
            match inner.queue.push(unit) {
                Ok(()) => {
                    inner.submitted.fetch_add(1, Ordering::Relaxed);
                    inner.work_cv.notify_one();
                    return Ok(());
                }
                Err(unit) if control.workers < inner.config.max_size => unit,
                Err(unit) => {
                    drop(control);
                    return Err(inner.reject(RejectReason::QueueFull, unit));
                }
            }
        };

        control.workers += 1;
        control.running += 1;
        control.spawned += 1;
        let thread_name = format!("{}-{}-{}", inner.thread_prefix, inner.name, control.spawned);
        drop(control);

        let worker = Arc::clone(inner);
        let first: Unit = unit;
        let slot = Arc::new(Mutex::new(Some(first)));
        let worker_slot = Arc::clone(&slot);
        let spawned = spawn_thread(
            thread_name,
            Box::new(move || {
                let first = worker_slot.lock().take();
                worker.work(first);
            }),
        );
        if spawned.is_err() {
            {
                let mut control = inner.control.lock();
                control.workers -= 1;
                control.running -= 1;
            }
            if let Some(unit) = slot.lock().take() {
                return Err(inner.reject(RejectReason::QueueFull, unit));
            }
        }
        inner.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Submits a batch, returning how many units were accepted. Refused
    /// units are dropped.
    pub fn execute_all(&self, units: impl IntoIterator<Item = Unit>) -> usize {
        units
            .into_iter()
            .map(|unit| self.submit(unit))
            .filter(std::result::Result::is_ok)
            .count()
    }

    /// Stalls workers before their next unit. Returns false if the pool was
    /// already paused or is shut down.
    pub fn pause(&self) -> bool {
        {
            let mut control = self.inner.control.lock();
            if control.paused || control.shutdown {
                return false;
            }
            control.paused = true;
        }
        info!(pool = %self.inner.name, "worker pool paused");
        self.inner.notify(|listener, name| listener.on_paused(name));
        true
    }

    /// Releases stalled workers. Returns false if the pool was not paused.
    pub fn resume(&self) -> bool {
        {
            let mut control = self.inner.control.lock();
            if !control.paused {
                return false;
            }
            control.paused = false;
            self.inner.pause_cv.notify_all();
        }
        info!(pool = %self.inner.name, "worker pool resumed");
        self.inner.notify(|listener, name| listener.on_resumed(name));
        true
    }

    /// Returns true while paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.control.lock().paused
    }

    /// Returns true once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.control.lock().shutdown
    }

    /// Units waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Live worker threads.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.control.lock().workers
    }

    /// A snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let control = self.inner.control.lock();
        PoolStats {
            workers: control.workers,
            idle: control.idle,
            running: control.running,
            queued: self.inner.queue.len(),
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            paused: control.paused,
        }
    }

    /// Registers a lifecycle listener.
    pub fn subscribe(&self, listener: Arc<dyn PoolListener>) -> ListenerId {
        let id = ListenerId::next();
        self.inner.listeners.lock().push((id, listener));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Stops intake and drains the pool for up to `grace`.
    ///
    /// Idempotent: later calls return the first call's report.
    pub fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let inner = &self.inner;
        {
            let mut control = inner.control.lock();
            if control.shutdown {
                while control.report.is_none() {
                    inner.drain_cv.wait(&mut control);
                }
                return control.report.unwrap_or_default();
            }
            control.shutdown = true;
            control.paused = false;
            inner.pause_cv.notify_all();
            inner.work_cv.notify_all();
        }
        info!(pool = %inner.name, grace_ms = grace.as_millis() as u64, "worker pool shutting down");
        inner.notify(|listener, name| listener.on_shutdown(name));
        inner.listeners.lock().clear();

        let completed_before = inner.completed.load(Ordering::Relaxed);
        let deadline = Instant::now() + grace;
        {
            let mut control = inner.control.lock();
            while (!inner.queue.is_empty() || control.running > 0) && Instant::now() < deadline {
                inner.drain_cv.wait_until(&mut control, deadline);
            }
        }
        let completed_in_grace = inner.completed.load(Ordering::Relaxed) - completed_before;

        let mut leftovers = Vec::new();
        while let Some(unit) = inner.queue.pop() {
            leftovers.push(unit);
        }
        let stragglers: Vec<JobHandle> = inner
            .running_jobs
            .lock()
            .iter()
            .filter_map(|slot| slot.lock().clone())
            .collect();
        let report = ShutdownReport {
            completed_in_grace,
            abandoned: leftovers.len(),
            interrupted: stragglers.len(),
        };
        if report.abandoned > 0 {
            warn!(pool = %inner.name, abandoned = report.abandoned, "dropping queued units after grace period");
        }
        drop(leftovers);
        if report.interrupted > 0 {
            warn!(pool = %inner.name, interrupted = report.interrupted, "cancelling jobs still running after grace period");
        }
        for job in &stragglers {
            job.cancel_with(CancelReason::shutdown().with_message("pool shut down"));
        }

        {
            let mut control = inner.control.lock();
            control.report = Some(report);
            inner.drain_cv.notify_all();
        }
        info!(
            pool = %inner.name,
            completed_in_grace = report.completed_in_grace,
            abandoned = report.abandoned,
            interrupted = report.interrupted,
            "worker pool shut down"
        );
        report
    }
}

impl PoolInner {
    fn reject(&self, reason: RejectReason, unit: Unit) -> Rejected {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(pool = %self.name, reason = %reason, "unit rejected");
        Rejected::new(reason, unit)
    }

    fn notify(&self, event: impl Fn(&dyn PoolListener, &str)) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| event(listener.as_ref(), &self.name)));
            if let Err(payload) = delivered {
                error!(
                    pool = %self.name,
                    panic = %panic_message(payload.as_ref()),
                    "pool listener panicked"
                );
            }
        }
    }

    /// Worker thread body.
    fn work(&self, first: Option<Unit>) {
        trace!(pool = %self.name, "worker started");
        let slot: RunningSlot = Arc::new(Mutex::new(None));
        self.running_jobs.lock().push(Arc::clone(&slot));
        cx::publish_running(Arc::clone(&slot));
        let mut next = first;
        loop {
            let unit = match next.take() {
                Some(unit) => unit,
                None => match self.take_unit() {
                    Some(unit) => unit,
                    None => break,
                },
            };
            self.run(unit);
        }
        cx::hide_running();
        self.running_jobs
            .lock()
            .retain(|published| !Arc::ptr_eq(published, &slot));
        trace!(pool = %self.name, "worker exiting");
    }

    /// Waits for the next unit and counts it as running. `None` means this
    /// worker should exit; the worker count has already been decremented.
    fn take_unit(&self) -> Option<Unit> {
        let mut control = self.control.lock();
        loop {
            if let Some(unit) = self.queue.pop() {
                control.running += 1;
                return Some(unit);
            }
            if control.shutdown {
                control.workers -= 1;
                self.drain_cv.notify_all();
                return None;
            }
            control.idle += 1;
            if control.workers > self.config.core_size {
                let timed_out = self
                    .work_cv
                    .wait_for(&mut control, self.config.keep_alive())
                    .timed_out();
                control.idle -= 1;
                if timed_out && self.queue.is_empty() && control.workers > self.config.core_size {
                    control.workers -= 1;
                    trace!(pool = %self.name, "surplus worker retired");
                    return None;
                }
            } else {
                self.work_cv.wait(&mut control);
                control.idle -= 1;
            }
        }
    }

    fn run(&self, unit: Unit) {
        {
            let mut control = self.control.lock();
            while control.paused && !control.shutdown {
                self.pause_cv.wait(&mut control);
            }
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(unit)) {
            error!(pool = %self.name, panic = %panic_message(&*payload), "unit panicked");
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        let mut control = self.control.lock();
        control.running -= 1;
        if control.running == 0 && self.queue.is_empty() {
            self.drain_cv.notify_all();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let mut control = self.inner.control.lock();
        if !control.shutdown {
            control.shutdown = true;
            control.paused = false;
            self.inner.pause_cv.notify_all();
            self.inner.work_cv.notify_all();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A [`Dispatcher`] backed by a [`WorkerPool`].
#[derive(Debug)]
pub struct PoolDispatcher {
    pool: WorkerPool,
}

impl PoolDispatcher {
    /// Wraps `pool`.
    #[must_use]
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl Dispatcher for PoolDispatcher {
    fn dispatch(&self, unit: Unit) -> std::result::Result<(), Rejected> {
        self.pool.submit(unit)
    }

    fn name(&self) -> &str {
        self.pool.name()
    }
}
