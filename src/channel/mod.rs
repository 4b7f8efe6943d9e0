//! FIFO handoff channels between jobs.
//!
//! A [`Channel`] is a shared handle: clone it to give another job a sender or
//! receiver end. Capacity is fixed at construction:
//!
//! - [`Channel::bounded`]: `send` blocks while `n` values are queued
//! - [`Channel::unbounded`]: `send` never blocks
//! - [`Channel::rendezvous`]: `send` returns only once a receiver has taken
//!   the value
//!
//! # Closing
//!
//! [`close`](Channel::close) is idempotent. It fails pending and future sends,
//! while receivers keep draining what is already queued and only see
//! [`RecvError::Closed`] once the channel is closed *and* empty.
//!
//! # Cancel Safety
//!
//! Blocking calls made from inside a job are interrupted when that job is
//! cancelled. A cancelled `send` hands the value back in
//! [`SendError::Cancelled`]; a cancelled `receive` consumes nothing.
//!
//! # Example
//!
//! ```ignore
//! let ch = Channel::bounded(4);
//! let tx = ch.clone();
//! scope.launch(move |_cx| {
//!     for i in 0..10 {
//!         tx.send(i)?;
//!     }
//!     tx.close();
//!     Ok(())
//! })?;
//! let total: i32 = ch.iter().sum();
//! ```

use crate::cx::{self, HookGuard, Wake};
use crate::error::{RecvError, Result, SendError, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
    /// Values ever enqueued.
    sent: u64,
    /// Values ever dequeued.
    taken: u64,
    /// Receivers blocked in `receive`.
    waiting_receivers: usize,
}

struct Inner<T> {
    /// `None` for unbounded, `Some(0)` for rendezvous.
    capacity: Option<usize>,
    state: Mutex<State<T>>,
    changed: Condvar,
}

impl<T> Inner<T> {
    fn has_room(&self, state: &State<T>) -> bool {
        match self.capacity {
            None => true,
            Some(0) => state.queue.is_empty(),
            Some(n) => state.queue.len() < n,
        }
    }
}

/// A FIFO queue shared by any number of senders and receivers.
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Channel")
            .field("capacity", &self.inner.capacity)
            .field("len", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> Channel<T> {
    /// Closes the channel. Returns true if this call closed it.
    pub fn close(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        self.inner.changed.notify_all();
        true
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().queue.is_empty()
    }

    /// Number of queued values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// The capacity; `None` if unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }
}

impl<T: Send + 'static> Channel<T> {
    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                state: Mutex::new(State {
                    queue: VecDeque::with_capacity(capacity.unwrap_or(0)),
                    closed: false,
                    sent: 0,
                    taken: 0,
                    waiting_receivers: 0,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// A channel holding at most `capacity` values. Zero means rendezvous.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    /// A channel with no capacity limit.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// A channel where every send waits for a matching receive.
    #[must_use]
    pub fn rendezvous() -> Self {
        Self::bounded(0)
    }

    /// Wakes this channel's waiters when the current job is cancelled.
    fn cancel_hook(&self) -> (Option<crate::cx::CancelToken>, Option<HookGuard>) {
        let token = cx::current_token();
        let hook = token.as_ref().map(|token| {
            let inner = Arc::clone(&self.inner);
            token.on_cancel(move || {
                let _state = inner.state.lock();
                inner.changed.notify_all();
            })
        });
        (token, hook)
    }

    /// Sends `value`, blocking while the channel is full.
    ///
    /// On a rendezvous channel this also waits for a receiver to take the
    /// value.
    pub fn send(&self, value: T) -> std::result::Result<(), SendError<T>> {
        let (token, _hook) = self.cancel_hook();
        let inner = &*self.inner;
        let mut state = inner.state.lock();

        let wake = cx::wait_until(&mut state, &inner.changed, token.as_ref(), None, |state| {
            state.closed || inner.has_room(state)
        });
        if state.closed {
            return Err(SendError::Closed(value));
        }
        if let Wake::Cancelled(_) = wake {
            return Err(SendError::Cancelled(value));
        }

        state.queue.push_back(value);
        state.sent += 1;
        let ticket = state.sent;
        inner.changed.notify_all();
        if inner.capacity != Some(0) {
            return Ok(());
        }

        let wake = cx::wait_until(&mut state, &inner.changed, token.as_ref(), None, |state| {
            state.taken >= ticket || state.closed
        });
        if state.taken >= ticket {
            return Ok(());
        }
        // Not taken: it is still the only queued value.
        let Some(value) = state.queue.pop_back() else {
            return Ok(());
        };
        state.sent -= 1;
        inner.changed.notify_all();
        match wake {
            Wake::Cancelled(_) => Err(SendError::Cancelled(value)),
            Wake::Ready | Wake::TimedOut => Err(SendError::Closed(value)),
        }
    }

    /// Sends without blocking.
    ///
    /// On a rendezvous channel this succeeds only if a receiver is already
    /// waiting.
    pub fn try_send(&self, value: T) -> std::result::Result<(), TrySendError<T>> {
        let inner = &*self.inner;
        let mut state = inner.state.lock();
        if state.closed {
            return Err(TrySendError::Closed(value));
        }
        let room = match inner.capacity {
            Some(0) => state.queue.is_empty() && state.waiting_receivers > 0,
            _ => inner.has_room(&state),
        };
        if !room {
            return Err(TrySendError::Full(value));
        }
        state.queue.push_back(value);
        state.sent += 1;
        inner.changed.notify_all();
        Ok(())
    }

    fn receive_until(&self, deadline: Option<Instant>, timeout: Duration) -> std::result::Result<T, RecvError> {
        let (token, _hook) = self.cancel_hook();
        let inner = &*self.inner;
        let mut state = inner.state.lock();
        state.waiting_receivers += 1;
        inner.changed.notify_all();
        let wake = cx::wait_until(&mut state, &inner.changed, token.as_ref(), deadline, |state| {
            state.closed || !state.queue.is_empty()
        });
        state.waiting_receivers -= 1;

        if let Wake::Cancelled(reason) = wake {
            return Err(RecvError::Cancelled(reason));
        }
        match state.queue.pop_front() {
            Some(value) => {
                state.taken += 1;
                inner.changed.notify_all();
                Ok(value)
            }
            None if state.closed => Err(RecvError::Closed),
            None => Err(RecvError::Timeout(timeout)),
        }
    }

    /// Receives the next value, blocking until one arrives.
    ///
    /// Fails with [`RecvError::Closed`] once the channel is closed and empty.
    pub fn receive(&self) -> std::result::Result<T, RecvError> {
        self.receive_until(None, Duration::ZERO)
    }

    /// Like [`receive`](Self::receive), giving up after `timeout`.
    pub fn receive_timeout(&self, timeout: Duration) -> std::result::Result<T, RecvError> {
        self.receive_until(Some(Instant::now() + timeout), timeout)
    }

    /// Receives a value if one is queued.
    pub fn try_receive(&self) -> Option<T> {
        let mut state = self.inner.state.lock();
        let value = state.queue.pop_front()?;
        state.taken += 1;
        self.inner.changed.notify_all();
        Some(value)
    }

    /// Receives values and hands each to `visitor` until the channel is
    /// closed and drained.
    ///
    /// Stops early with the visitor's error, or if the calling job is
    /// cancelled.
    pub fn consume_each<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        loop {
            match self.receive() {
                Ok(value) => visitor(value)?,
                Err(RecvError::Closed) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// A blocking iterator that ends when the channel is closed and drained
    /// (or the calling job is cancelled).
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { channel: self }
    }
}

/// Borrowing iterator returned by [`Channel::iter`].
#[derive(Debug)]
pub struct Iter<'a, T> {
    channel: &'a Channel<T>,
}

impl<T: Send + 'static> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.receive().ok()
    }
}

/// Owning iterator returned by [`Channel::into_iter`](IntoIterator::into_iter).
#[derive(Debug)]
pub struct IntoIter<T> {
    channel: Channel<T>,
}

impl<T: Send + 'static> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.receive().ok()
    }
}

impl<T: Send + 'static> IntoIterator for Channel<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { channel: self }
    }
}

impl<'a, T: Send + 'static> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}
