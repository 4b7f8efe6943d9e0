//! Error types.
//!
//! Every fallible operation in the crate reports [`Error`]. A job body's own
//! failure travels through [`Error::Failed`] unchanged; the other variants are
//! raised by the runtime itself.
//!
//! `Error` is `Clone`: a single failure is delivered to an exception handler
//! and also stored on the job for [`Job::join`](crate::Job::join) to re-raise.

use crate::config::ConfigError;
use crate::types::{CancelReason, ScopeId};
use core::fmt;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a unit of work was refused by a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The intake queue is at capacity and no more workers may be started.
    QueueFull,
    /// The dispatcher has been shut down.
    Shutdown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "queue full"),
            Self::Shutdown => write!(f, "shut down"),
        }
    }
}

/// The error type for all runtime operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Work was launched on a scope that is closed (or whose parent is closed).
    #[error("scope {scope} is not active")]
    InactiveScope {
        /// The scope that refused the launch.
        scope: ScopeId,
    },
    /// An operation was attempted in a state that does not permit it.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    /// Send on a closed channel, or receive on a closed and drained one.
    #[error("channel closed")]
    ChannelClosed,
    /// A deadline elapsed before the operation finished.
    #[error("timed out after {after:?}")]
    Timeout {
        /// The configured timeout.
        after: Duration,
    },
    /// A circuit breaker refused the call.
    #[error("circuit breaker is open")]
    CircuitOpen,
    /// The job (or the awaiting unit) was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(CancelReason),
    /// A dispatcher refused the unit of work.
    #[error("rejected: {0}")]
    Rejected(RejectReason),
    /// A job body panicked.
    #[error("job panicked: {0}")]
    Panicked(String),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The job body's own failure, passed through unchanged.
    #[error(transparent)]
    Failed(Arc<dyn StdError + Send + Sync>),
    /// Internal early-exit marker used by short-circuiting flow operators.
    #[doc(hidden)]
    #[error("flow aborted")]
    FlowAborted,
}

/// Discriminant of [`Error`], for matching without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::InactiveScope`].
    InactiveScope,
    /// See [`Error::IllegalState`].
    IllegalState,
    /// See [`Error::ChannelClosed`].
    ChannelClosed,
    /// See [`Error::Timeout`].
    Timeout,
    /// See [`Error::CircuitOpen`].
    CircuitOpen,
    /// See [`Error::Cancelled`].
    Cancelled,
    /// See [`Error::Rejected`].
    Rejected,
    /// See [`Error::Panicked`].
    Panicked,
    /// See [`Error::Config`].
    Config,
    /// See [`Error::Failed`].
    Failed,
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

impl Error {
    /// Wraps an arbitrary error as a body failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }

    /// Creates a body failure from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(Arc::new(Message(message.into())))
    }

    /// Creates a cancellation error with the given reason.
    #[must_use]
    pub const fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled(reason)
    }

    /// Returns the discriminant.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InactiveScope { .. } => ErrorKind::InactiveScope,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::ChannelClosed => ErrorKind::ChannelClosed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            Self::Cancelled(_) | Self::FlowAborted => ErrorKind::Cancelled,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::Panicked(_) => ErrorKind::Panicked,
            Self::Config(_) => ErrorKind::Config,
            Self::Failed(_) => ErrorKind::Failed,
        }
    }

    /// Returns true for cancellation signals.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true for timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true when a circuit breaker refused the call.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    /// Returns true when a dispatcher refused the work.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns the cancellation reason, if this is a cancellation.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(reason),
            _ => None,
        }
    }

    /// Downcasts a body failure to a concrete error type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Error returned by [`Channel::send`](crate::Channel::send); hands the value back.
pub enum SendError<T> {
    /// The channel was closed before the value could be delivered.
    Closed(T),
    /// The sending unit was cancelled while waiting for capacity.
    Cancelled(T),
}

impl<T> SendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(value) | Self::Cancelled(value) => value,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(_) => f.write_str("SendError::Closed(..)"),
            Self::Cancelled(_) => f.write_str("SendError::Cancelled(..)"),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(_) => write!(f, "sending on a closed channel"),
            Self::Cancelled(_) => write!(f, "send cancelled"),
        }
    }
}

impl<T> StdError for SendError<T> {}

/// Error returned by [`Channel::try_send`](crate::Channel::try_send).
pub enum TrySendError<T> {
    /// The channel is at capacity.
    Full(T),
    /// The channel is closed.
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }

    /// Returns true if the channel was full.
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("TrySendError::Full(..)"),
            Self::Closed(_) => f.write_str("TrySendError::Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "channel full"),
            Self::Closed(_) => write!(f, "sending on a closed channel"),
        }
    }
}

impl<T> StdError for TrySendError<T> {}

/// Error returned by [`Channel::receive`](crate::Channel::receive).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The channel is closed and every buffered value has been received.
    #[error("receiving on a closed and empty channel")]
    Closed,
    /// The receiving unit was cancelled while waiting.
    #[error("receive cancelled: {0}")]
    Cancelled(CancelReason),
    /// `receive_timeout` elapsed before a value arrived.
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),
}

impl<T> From<SendError<T>> for Error {
    fn from(err: SendError<T>) -> Self {
        match err {
            SendError::Closed(_) => Self::ChannelClosed,
            SendError::Cancelled(_) => Self::Cancelled(CancelReason::default()),
        }
    }
}

impl<T> From<TrySendError<T>> for Error {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Closed(_) => Self::ChannelClosed,
            TrySendError::Full(_) => Self::IllegalState("channel full"),
        }
    }
}

impl From<RecvError> for Error {
    fn from(err: RecvError) -> Self {
        match err {
            RecvError::Closed => Self::ChannelClosed,
            RecvError::Cancelled(reason) => Self::Cancelled(reason),
            RecvError::Timeout(after) => Self::Timeout { after },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::failed(err)
    }
}
