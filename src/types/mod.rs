//! Core types shared across the runtime.
//!
//! - [`id`]: Identifier types (`JobId`, `ScopeId`, `ListenerId`)
//! - [`cancel`]: Cancellation reason and kind types

pub mod cancel;
pub mod id;

pub use cancel::{CancelKind, CancelReason};
pub use id::{JobId, ListenerId, ScopeId};
