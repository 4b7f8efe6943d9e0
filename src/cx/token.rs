//! Cancellation tokens and cancellable blocking waits.
//!
//! Every job owns a [`CancelToken`]. Blocking primitives (sleep, channel
//! send/receive, job join) consult the token of the job running on the current
//! thread and register a wake hook while they block, so a cancellation
//! interrupts the wait instead of waiting for it to end on its own.

use crate::types::CancelReason;
use parking_lot::{Condvar, Mutex, MutexGuard};
use slab::Slab;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

type Hook = Arc<dyn Fn() + Send + Sync>;

struct TokenInner {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    hooks: Mutex<Slab<Hook>>,
    sleep_lock: Mutex<()>,
    sleep_cv: Condvar,
}

/// A shared cancellation flag with a reason and wake hooks.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                hooks: Mutex::new(Slab::new()),
                sleep_lock: Mutex::new(()),
                sleep_cv: Condvar::new(),
            }),
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        if !self.is_cancelled() {
            return None;
        }
        self.inner.reason.lock().clone()
    }

    /// Requests cancellation.
    ///
    /// Returns true on the first call. Later calls only strengthen the
    /// recorded reason.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if !self.request(reason) {
            return false;
        }
        self.wake();
        true
    }

    /// Sets the flag and records the reason without waking anyone.
    ///
    /// Returns true on the first request. A waiter that is not woken still
    /// observes the flag the next time its wait loop checks it.
    pub(crate) fn request(&self, reason: CancelReason) -> bool {
        let mut slot = self.inner.reason.lock();
        match slot.as_mut() {
            Some(existing) => {
                existing.strengthen(&reason);
                false
            }
            None => {
                *slot = Some(reason);
                self.inner.cancelled.store(true, Ordering::Release);
                true
            }
        }
    }

    /// Wakes sleepers and runs the registered hooks.
    pub(crate) fn wake(&self) {
        {
            let _guard = self.inner.sleep_lock.lock();
            self.inner.sleep_cv.notify_all();
        }

        let hooks: Vec<Hook> = self.inner.hooks.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for hook in hooks {
            hook();
        }
    }

    /// Registers a hook that runs when the token is cancelled.
    ///
    /// The hook is removed when the returned guard drops. A hook registered on
    /// an already-cancelled token never runs; callers re-check
    /// [`is_cancelled`](Self::is_cancelled) after registering.
    pub(crate) fn on_cancel(&self, hook: impl Fn() + Send + Sync + 'static) -> HookGuard {
        let key = self.inner.hooks.lock().insert(Arc::new(hook));
        HookGuard {
            token: Arc::clone(&self.inner),
            key,
        }
    }

    /// Sleeps for `duration`, returning early with the reason if cancelled.
    pub(crate) fn sleep(&self, duration: Duration) -> Result<(), CancelReason> {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.sleep_lock.lock();
        loop {
            if let Some(reason) = self.reason() {
                return Err(reason);
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            self.inner.sleep_cv.wait_until(&mut guard, deadline);
        }
    }
}

/// Deregisters a cancel hook on drop.
pub(crate) struct HookGuard {
    token: Arc<TokenInner>,
    key: usize,
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        let mut hooks = self.token.hooks.lock();
        if hooks.contains(self.key) {
            hooks.remove(self.key);
        }
    }
}

/// How a cancellable wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Wake {
    Ready,
    TimedOut,
    Cancelled(CancelReason),
}

/// Waits on `condvar` until `ready` holds, the deadline passes, or `token`
/// is cancelled.
///
/// The caller must have registered a hook on `token` that notifies `condvar`
/// while holding the same mutex, otherwise cancellation is only noticed on the
/// next spurious or regular wakeup.
pub(crate) fn wait_until<T>(
    guard: &mut MutexGuard<'_, T>,
    condvar: &Condvar,
    token: Option<&CancelToken>,
    deadline: Option<Instant>,
    mut ready: impl FnMut(&mut T) -> bool,
) -> Wake {
    loop {
        if ready(&mut **guard) {
            return Wake::Ready;
        }
        if let Some(reason) = token.and_then(CancelToken::reason) {
            return Wake::Cancelled(reason);
        }
        match deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return Wake::TimedOut;
                }
                condvar.wait_until(guard, deadline);
            }
            None => condvar.wait(guard),
        }
    }
}
