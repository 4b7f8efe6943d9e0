//! Scopeline: structured concurrency on plain threads.
//!
//! # Overview
//!
//! Work runs as [`Job`]s launched in a [`Scope`]. Jobs form a tree: a job is
//! done only once its own body and all of its children are done, and
//! cancelling a job cancels its children first. Closing a scope cancels its
//! child scopes, then its jobs, then releases its resources, exactly once.
//!
//! Every blocking call in the crate (joining a job, channel send and receive,
//! sleeping) is interrupted when the job that makes it is cancelled, so job
//! bodies can block freely without cooperating.
//!
//! # Core Guarantees
//!
//! - **No launch into a closed scope**: launching on an inactive scope fails
//!   with [`Error::InactiveScope`]
//! - **Failures are never dropped**: a body's failure reaches its exception
//!   handler and is stored for [`Job::join`]
//! - **Backpressure, not silent blocking**: a full [`WorkerPool`] rejects new
//!   work and the job fails with [`Error::Rejected`]
//! - **Restartable pipelines**: collecting a [`Flow`] twice runs it twice
//!
//! # Module Structure
//!
//! - [`scope`]: Scopes, contexts and scoped resources
//! - [`job`]: Job handles, completers and job states
//! - [`cx`]: What a running job sees: [`Cx`] and [`CancelToken`]
//! - [`runtime`]: Dispatchers, the pausable worker pool and the process-wide registry
//! - [`channel`]: Bounded, unbounded and rendezvous channels
//! - [`flow`]: Lazy, restartable pipelines
//! - [`combinator`]: Retry, timeout, race, parallel, debounce, throttle,
//!   circuit breaker and rate limiting
//! - [`time`]: Cancellable sleep, intervals and delays
//! - [`config`]: Pool and runtime configuration
//! - [`error`](mod@error): Error types
//! - [`types`]: Identifiers and cancellation reasons
//!
//! # Example
//!
//! ```
//! use scopeline::{runtime::ThreadPerTask, Scope};
//! use std::sync::Arc;
//!
//! let scope = Scope::with_dispatcher(Arc::new(ThreadPerTask::new()));
//! let job = scope.spawn(|cx| {
//!     let child = cx.spawn_child(|_| Ok(20))?;
//!     Ok(child.join()? + 1)
//! })?;
//! assert_eq!(job.join()?, 21);
//! scope.close();
//! # Ok::<(), scopeline::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]

pub mod channel;
pub mod combinator;
pub mod config;
pub mod cx;
pub mod error;
pub mod flow;
pub mod job;
pub mod runtime;
pub mod scope;
pub mod time;
pub mod types;

mod tracing_compat;
mod util;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use channel::Channel;
pub use config::{ConfigError, PoolConfig, RuntimeConfig};
pub use cx::{CancelToken, Cx};
pub use error::{Error, ErrorKind, RecvError, RejectReason, Result, SendError, TrySendError};
pub use flow::{Emitter, Flow};
pub use job::{Completer, ExceptionHandler, Job, JobHandle, JobState};
pub use runtime::{Dispatcher, WorkerPool};
pub use scope::{Context, Resource, Scope};
pub use types::{CancelKind, CancelReason, JobId, ScopeId};
