//! Runtime configuration.
//!
//! The runtime never inspects the host to size its pools; callers supply a
//! [`PoolConfig`] directly or derive one from a parallelism figure with
//! [`PoolConfig::for_parallelism`].
//!
//! With the `config-file` feature a [`RuntimeConfig`] can also be loaded from
//! TOML:
//!
//! ```toml
//! shutdown_grace_ms = 5000
//! thread_name_prefix = "app"
//!
//! [pool]
//! core_size = 2
//! max_size = 8
//! queue_capacity = 64
//! keep_alive_ms = 30000
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CORE_SIZE: usize = 1;
const DEFAULT_MAX_SIZE: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 10;
const DEFAULT_KEEP_ALIVE_MS: u64 = 30_000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 30_000;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// The configuration text could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(String),
}

/// Sizing policy for a [`WorkerPool`](crate::runtime::WorkerPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers kept alive even when idle.
    pub core_size: usize,
    /// Upper bound on workers; extra workers start only when the queue is full.
    pub max_size: usize,
    /// Capacity of the intake queue.
    pub queue_capacity: usize,
    /// Idle time after which a worker above `core_size` retires, in milliseconds.
    pub keep_alive_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: DEFAULT_CORE_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
        }
    }
}

impl PoolConfig {
    /// Derives a sizing policy from the available parallelism.
    ///
    /// Half the parallelism (at least one) stays resident; the pool may grow to
    /// the full parallelism, but never below four workers.
    #[must_use]
    pub fn for_parallelism(parallelism: usize) -> Self {
        Self {
            core_size: (parallelism / 2).max(DEFAULT_CORE_SIZE),
            max_size: parallelism.max(DEFAULT_MAX_SIZE),
            ..Self::default()
        }
    }

    /// A reduced profile for constrained hosts: one resident worker, at most two.
    #[must_use]
    pub fn constrained() -> Self {
        Self {
            core_size: 1,
            max_size: 2,
            ..Self::default()
        }
    }

    /// Sets the resident worker count.
    #[must_use]
    pub const fn with_core_size(mut self, core_size: usize) -> Self {
        self.core_size = core_size;
        self
    }

    /// Sets the maximum worker count.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the intake queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the idle keep-alive for workers above the core size.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_ms = keep_alive.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    /// Returns the keep-alive as a [`Duration`].
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Checks the policy for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_size == 0 {
            return Err(ConfigError::Invalid {
                field: "core_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_size < self.core_size {
            return Err(ConfigError::Invalid {
                field: "max_size",
                reason: format!(
                    "must be >= core_size ({} < {})",
                    self.max_size, self.core_size
                ),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Configuration for the process-wide dispatcher registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Sizing of the default (CPU-bound) pool.
    pub pool: PoolConfig,
    /// Sizing of the IO pool.
    pub io_pool: PoolConfig,
    /// How long shutdown waits for queued and running work, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            pool: PoolConfig::for_parallelism(parallelism),
            io_pool: PoolConfig {
                core_size: DEFAULT_CORE_SIZE,
                max_size: parallelism.max(DEFAULT_MAX_SIZE) * 4,
                queue_capacity: 256,
                keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            },
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            thread_name_prefix: "scopeline".into(),
        }
    }
}

impl RuntimeConfig {
    /// Sets the default pool sizing.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the IO pool sizing.
    #[must_use]
    pub fn with_io_pool(mut self, io_pool: PoolConfig) -> Self {
        self.io_pool = io_pool;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Returns the shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validates both pools.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.io_pool.validate()?;
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "thread_name_prefix",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallelism_heuristic() {
        let cfg = PoolConfig::for_parallelism(8);
        assert_eq!(cfg.core_size, 4);
        assert_eq!(cfg.max_size, 8);
        assert_eq!(cfg.queue_capacity, 10);
        assert_eq!(cfg.keep_alive(), Duration::from_secs(30));

        let small = PoolConfig::for_parallelism(1);
        assert_eq!(small.core_size, 1);
        assert_eq!(small.max_size, 4);
        assert!(small.validate().is_ok());
    }

    #[test]
    fn constrained_profile() {
        let cfg = PoolConfig::constrained();
        assert_eq!((cfg.core_size, cfg.max_size), (1, 2));
    }

    #[test]
    fn validate_rejects_inconsistent_sizes() {
        let err = PoolConfig::default().with_core_size(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "core_size", .. }));

        let err = PoolConfig::default()
            .with_core_size(4)
            .with_max_size(2)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_size", .. }));

        let err = PoolConfig::default()
            .with_queue_capacity(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "queue_capacity", .. }));
    }

    #[test]
    fn runtime_defaults_validate() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.shutdown_grace(), Duration::from_secs(30));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: RuntimeConfig = toml::from_str(
            r#"
            shutdown_grace_ms = 250

            [pool]
            core_size = 2
            max_size = 3
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.shutdown_grace(), Duration::from_millis(250));
        assert_eq!(cfg.pool.core_size, 2);
        assert_eq!(cfg.pool.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(cfg.thread_name_prefix, "scopeline");
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn from_toml_str_validates() {
        let err = RuntimeConfig::from_toml_str("[pool]\ncore_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "core_size", .. }));
        let err = RuntimeConfig::from_toml_str("pool = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
