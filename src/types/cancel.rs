//! Why a job was cancelled.
//!
//! Cancellation is a signal, not a failure: a cancelled job carries a
//! [`CancelReason`] and anything awaiting it observes
//! [`Error::Cancelled`](crate::Error::Cancelled).
//!
//! When several cancellations hit the same job only the first one stops it,
//! but the recorded reason may be upgraded by a later one of higher rank, so
//! a pool shutdown is never reported as a plain user cancel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What triggered a cancellation, in increasing rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CancelKind {
    /// `cancel()` called directly on a job or scope.
    User,
    /// A deadline passed.
    Timeout,
    /// Another contender of a race finished first.
    RaceLost,
    /// A newer debounced call replaced this one.
    Superseded,
    /// An ancestor job or the owning scope went away.
    ParentCancelled,
    /// The dispatcher shut down before the job ran.
    Shutdown,
}

impl CancelKind {
    /// Rank used when two reasons compete; larger wins.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Timeout => 1,
            Self::RaceLost | Self::Superseded => 2,
            Self::ParentCancelled => 3,
            Self::Shutdown => 4,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Timeout => "timeout",
            Self::RaceLost => "race lost",
            Self::Superseded => "superseded",
            Self::ParentCancelled => "parent cancelled",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A cancellation kind plus an optional static note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReason {
    kind: CancelKind,
    #[serde(skip)]
    message: Option<&'static str>,
}

impl CancelReason {
    /// A reason of `kind` with no message.
    #[must_use]
    pub const fn of(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// A user cancellation with a note.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self::of(CancelKind::User).with_message(message)
    }

    /// See [`CancelKind::Timeout`].
    #[must_use]
    pub const fn timeout() -> Self {
        Self::of(CancelKind::Timeout)
    }

    /// See [`CancelKind::RaceLost`].
    #[must_use]
    pub const fn race_lost() -> Self {
        Self::of(CancelKind::RaceLost)
    }

    /// See [`CancelKind::Superseded`].
    #[must_use]
    pub const fn superseded() -> Self {
        Self::of(CancelKind::Superseded)
    }

    /// See [`CancelKind::ParentCancelled`].
    #[must_use]
    pub const fn parent_cancelled() -> Self {
        Self::of(CancelKind::ParentCancelled)
    }

    /// See [`CancelKind::Shutdown`].
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::of(CancelKind::Shutdown)
    }

    /// Replaces the note.
    #[must_use]
    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    /// The kind.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// The note, if any.
    #[must_use]
    pub const fn message(&self) -> Option<&'static str> {
        self.message
    }

    /// True for [`CancelKind::Shutdown`].
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, CancelKind::Shutdown)
    }

    /// Folds a later reason into this one.
    ///
    /// A higher-ranked `other` replaces this reason outright; one of equal
    /// rank only supplies a note if this reason has none. Returns whether
    /// anything changed.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        use std::cmp::Ordering;

        match other.kind.rank().cmp(&self.kind.rank()) {
            Ordering::Greater => {
                *self = other.clone();
                true
            }
            Ordering::Equal if self.message.is_none() && other.message.is_some() => {
                self.message = other.message;
                true
            }
            _ => false,
        }
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::of(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message {
            Some(message) => write!(f, "{}: {message}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}
