//! Capability context and cancellation plumbing.
//!
//! [`Cx`] is what a job body sees of the runtime: its own handle, its scope,
//! and its cancellation state. The context of the job running on the current
//! thread is also reachable through [`Cx::current`], which is how blocking
//! primitives make their waits cancellable without taking a `&Cx` argument.

mod cx;
mod token;

pub use cx::Cx;
pub use token::CancelToken;

pub(crate) use cx::{current_token, enter, hide_running, publish_running, RunningSlot};
pub(crate) use token::{wait_until, HookGuard, Wake};
