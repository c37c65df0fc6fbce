//! Error types for anvilq operations.

use thiserror::Error;

/// Result type used throughout anvilq.
pub type AnvilResult<T> = Result<T, AnvilError>;

/// Boxed error carried as the source of transport and task failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for anvilq operations.
#[derive(Error, Debug)]
pub enum AnvilError {
    /// Broker or backend I/O failure
    #[error("Transport error: {message}")]
    Transport {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<BoxError>,
    },

    /// Malformed task message, event or result payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No task is registered under the requested name
    #[error("task {name} is not registered")]
    TaskNotRegistered {
        /// The task name that wasn't found
        name: String,
    },

    /// Keyword or positional arguments could not be bound
    #[error("invalid arguments for task {task}: {message}")]
    ArgumentValidation {
        /// Task the arguments were meant for
        task: String,
        /// What was wrong with them
        message: String,
    },

    /// Task body returned an error
    #[error("{message}")]
    TaskExecution {
        /// Error message, forwarded verbatim as the event exception
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<BoxError>,
    },

    /// The result of a successful execution could not be stored
    #[error("failed to persist result for task {task_id}")]
    ResultPersistence {
        /// Message id the result belonged to
        task_id: String,
        /// Backend failure
        #[source]
        source: Box<AnvilError>,
    },

    /// Backend holds no result for the id
    #[error("result not available for task id: {task_id}")]
    ResultNotFound {
        /// The task id that was looked up
        task_id: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Worker pool is already running
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Worker pool is not running
    #[error("worker pool is not running")]
    NotRunning,
}

impl AnvilError {
    /// Create a transport error wrapping the underlying failure
    pub fn transport<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a task execution error from a plain message
    pub fn task_execution(message: impl Into<String>) -> Self {
        Self::TaskExecution {
            message: message.into(),
            source: None,
        }
    }

    /// Create a task execution error keeping the underlying cause
    pub fn task_execution_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TaskExecution {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an argument validation error
    pub fn validation(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArgumentValidation {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the error comes from the task itself rather than the runtime.
    ///
    /// Task-level errors end up in a `task-failed` event; everything else is
    /// only logged.
    pub fn is_task_error(&self) -> bool {
        matches!(
            self,
            Self::TaskNotRegistered { .. }
                | Self::ArgumentValidation { .. }
                | Self::TaskExecution { .. }
        )
    }
}

#[cfg(feature = "redis-queue")]
impl From<redis::RedisError> for AnvilError {
    fn from(err: redis::RedisError) -> Self {
        Self::transport(format!("Redis error: {}", err), err)
    }
}
