//! Configuration types for anvilq.
//!
//! This module contains the configuration structures used by the worker pool,
//! the broker and result backend transports, and logging.

use crate::error::{AnvilError, AnvilResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for anvilq.
///
/// # Examples
///
/// ```rust
/// use anvilq::config::{AnvilConfig, WorkerConfig};
///
/// // Use default configuration
/// let config = AnvilConfig::default();
///
/// // Custom configuration
/// let config = AnvilConfig {
///     workers: WorkerConfig::with_workers(8).with_poll_interval(50),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnvilConfig {
    /// Worker pool configuration
    pub workers: WorkerConfig,

    /// Task and event queue configuration
    pub broker: BrokerConfig,

    /// Result store configuration
    pub backend: BackendConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent pollers to spawn
    pub num_workers: usize,

    /// Interval between two polls of the same worker (in milliseconds)
    pub poll_interval_ms: u64,

    /// Prefix of the hostname reported in events; the worker index is appended
    pub hostname_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get().max(1),
            poll_interval_ms: 100,
            hostname_prefix: "worker".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create a new worker configuration with a specific number of workers.
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Set the hostname prefix reported in events.
    pub fn with_hostname_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.hostname_prefix = prefix.into();
        self
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms.millis()
    }

    /// Hostname of the worker with the given index.
    pub fn hostname(&self, worker_id: usize) -> String {
        format!("{}{}", self.hostname_prefix, worker_id)
    }
}

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Queue task messages are pushed to and popped from
    pub task_queue: String,

    /// Queue lifecycle events are pushed to
    pub event_queue: String,

    /// Bounded wait of a single receive call (in milliseconds)
    pub receive_timeout_ms: u64,

    /// Transport-specific configuration
    pub transport: TransportConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            task_queue: "celery".to_string(),
            event_queue: "celery-events".to_string(),
            receive_timeout_ms: 1000,
            transport: TransportConfig::InMemory,
        }
    }
}

impl BrokerConfig {
    /// Create configuration for the in-memory transport.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Create configuration for the Redis transport.
    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    pub fn redis(connection_string: impl Into<String>) -> Self {
        Self {
            transport: TransportConfig::Redis(RedisConfig {
                connection_string: connection_string.into(),
                connect_timeout_secs: 10,
            }),
            ..Default::default()
        }
    }

    /// Set the task and event queue names.
    pub fn with_queues(mut self, task_queue: impl Into<String>, event_queue: impl Into<String>) -> Self {
        self.task_queue = task_queue.into();
        self.event_queue = event_queue.into();
        self
    }

    /// Set the receive timeout.
    pub fn with_receive_timeout(mut self, timeout_ms: u64) -> Self {
        self.receive_timeout_ms = timeout_ms;
        self
    }

    /// Receive timeout as a `Duration`.
    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout_ms.millis()
    }
}

/// Transport shared by the broker and the result backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransportConfig {
    /// In-process queues and result map (default)
    InMemory,

    /// Redis lists and keys
    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    Redis(RedisConfig),
}

/// Redis connection configuration.
#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    pub connection_string: String,

    /// Timeout for establishing the connection (in seconds)
    pub connect_timeout_secs: u64,
}

/// Result backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Expiration of stored results (in seconds); `None` keeps them forever
    pub result_ttl_secs: Option<u64>,
}

impl BackendConfig {
    /// Expire stored results after the given number of seconds.
    pub fn with_result_ttl(mut self, ttl_secs: u64) -> Self {
        self.result_ttl_secs = Some(ttl_secs);
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, overridden by `RUST_LOG` when set
    pub level: LogLevel,

    /// Enable colored output
    pub colored: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            colored: true,
            include_targets: false,
        }
    }
}

impl LoggingConfig {
    /// Install a global `tracing` subscriber for this configuration.
    ///
    /// Fails if a global subscriber was already installed.
    pub fn init(&self) -> AnvilResult<()> {
        use tracing_subscriber::EnvFilter;

        let level: tracing::Level = self.level.clone().into();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(self.colored)
            .with_target(self.include_targets)
            .try_init()
            .map_err(|e| AnvilError::config(format!("failed to install logger: {}", e)))
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Helper trait for converting durations in configuration.
pub trait DurationExt {
    /// Convert seconds to Duration
    fn secs(self) -> Duration;
    /// Convert milliseconds to Duration
    fn millis(self) -> Duration;
}

impl DurationExt for u64 {
    fn secs(self) -> Duration {
        Duration::from_secs(self)
    }

    fn millis(self) -> Duration {
        Duration::from_millis(self)
    }
}

impl AnvilConfig {
    /// Create a new configuration optimized for development.
    pub fn development() -> Self {
        Self {
            workers: WorkerConfig::with_workers(2),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: true,
                include_targets: true,
            },
            ..Default::default()
        }
    }

    /// Create a new configuration optimized for production.
    pub fn production() -> Self {
        Self {
            workers: WorkerConfig::with_workers(num_cpus::get() * 2),
            backend: BackendConfig::default().with_result_ttl(86400),
            logging: LoggingConfig {
                level: LogLevel::Info,
                colored: false,
                include_targets: false,
            },
            ..Default::default()
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            workers: WorkerConfig::with_workers(1).with_poll_interval(10),
            broker: BrokerConfig::in_memory().with_receive_timeout(50),
            backend: BackendConfig::default(),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: false,
                include_targets: true,
            },
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.workers.num_workers == 0 {
            errors.push("Number of workers must be greater than 0".to_string());
        }

        if self.workers.num_workers > 1000 {
            errors.push("Number of workers should not exceed 1000".to_string());
        }

        if self.workers.poll_interval_ms == 0 {
            errors.push("Poll interval must be greater than 0".to_string());
        }

        if self.broker.receive_timeout_ms == 0 {
            errors.push("Receive timeout must be greater than 0".to_string());
        }

        if self.broker.task_queue.is_empty() || self.broker.event_queue.is_empty() {
            errors.push("Queue names must not be empty".to_string());
        }

        if self.broker.task_queue == self.broker.event_queue {
            errors.push("Task queue and event queue must be distinct".to_string());
        }

        if self.backend.result_ttl_secs == Some(0) {
            errors.push("Result TTL must be greater than 0 when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
