//! Shared helpers for unit and integration tests.
//!
//! Tests call [`init_test_logging`] once at the top and bracket themselves
//! with [`test_phase!`](crate::test_phase) / [`test_complete!`](crate::test_complete)
//! so a failing run shows where in the test it stopped.

use std::sync::Once;
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

/// Installs a `tracing` fmt subscriber for tests, once per process.
///
/// Honours `RUST_LOG`; defaults to `scopeline=debug`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scopeline=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .try_init();
    });
}

#[doc(hidden)]
pub fn log_phase(name: &str) {
    tracing::info!(test = name, "test phase: start");
}

#[doc(hidden)]
pub fn log_complete(name: &str) {
    tracing::info!(test = name, "test phase: complete");
}

#[doc(hidden)]
pub fn log_assert(message: &str, expected: &str, actual: &str) {
    tracing::debug!(message, expected, actual, "assertion");
}

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition became true.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Marks the start of a test.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_utils::log_phase($name)
    };
}

/// Marks the successful end of a test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_utils::log_complete($name)
    };
}

/// Asserts `cond`, logging the expected and actual values first.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {{
        $crate::test_utils::log_assert(
            $msg,
            &format!("{:?}", $expected),
            &format!("{:?}", $actual),
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    }};
}
