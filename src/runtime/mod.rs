//! Dispatchers: where units of work run.
//!
//! - [`ThreadPerTask`]: one named OS thread per unit
//! - [`WorkerPool`] / [`PoolDispatcher`]: bounded, pausable thread pool
//! - [`SingleThreadDispatcher`]: one dedicated thread, FIFO
//! - [`Inline`]: runs on the submitting thread
//! - [`registry`]: the process-wide set of the above

mod dispatcher;
mod pool;
pub mod registry;
mod single_thread;

pub use dispatcher::{Dispatcher, Inline, Rejected, ThreadPerTask, Unit};
pub use pool::{PoolDispatcher, PoolListener, PoolStats, ShutdownReport, WorkerPool};
pub use registry::Dispatchers;
pub use single_thread::SingleThreadDispatcher;
