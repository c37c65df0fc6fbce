//! The anvilq client and worker pool.
//!
//! [`Client`] is the composition root: it holds the broker and backend chosen
//! at construction time and drives a [`WorkerPool`] built on top of them. The
//! same client can act as a producer (`delay`, `send_task`, `get_result`) and
//! as a consumer (`register`, `start_workers`).

use crate::backend::{Backend, BackendFactory};
use crate::broker::{Broker, BrokerFactory};
use crate::config::{AnvilConfig, WorkerConfig};
use crate::error::{AnvilError, AnvilResult};
use crate::protocol::{ResultMessage, TaskMessage};
use crate::task::Task;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod pool;
pub mod registry;
pub mod worker;

pub use pool::{PoolStats, PoolStatsSnapshot, WorkerPool};
pub use registry::TaskRegistry;
pub use worker::{Execution, Worker};

/// Producer and consumer facade over a broker, a backend and a worker pool.
///
/// # Examples
///
/// ```rust,no_run
/// use anvilq::prelude::*;
/// use serde_json::{Map, json};
///
/// #[tokio::main]
/// async fn main() -> AnvilResult<()> {
///     let client = Client::from_config(&AnvilConfig::development()).await?;
///     client
///         .register("add", TaskFn::new(|args, _kwargs| async move {
///             let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
///             Ok(json!(sum))
///         }))
///         .await;
///
///     client.start_workers(&CancellationToken::new()).await?;
///     let id = client.delay("add", vec![json!(2), json!(3)], Map::new()).await?;
///     println!("Enqueued {}", id);
///
///     client.wait_for_shutdown().await
/// }
/// ```
pub struct Client {
    broker: Arc<dyn Broker>,
    backend: Arc<dyn Backend>,
    pool: WorkerPool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client over the given capabilities.
    pub fn new(broker: Arc<dyn Broker>, backend: Arc<dyn Backend>, config: WorkerConfig) -> Self {
        let pool = WorkerPool::new(Arc::clone(&broker), Arc::clone(&backend), config);
        Self {
            broker,
            backend,
            pool,
        }
    }

    /// Validate `config` and build the broker and backend it describes.
    pub async fn from_config(config: &AnvilConfig) -> AnvilResult<Self> {
        config
            .validate()
            .map_err(|errors| AnvilError::config(errors.join("; ")))?;

        let broker = BrokerFactory::from_config(config.broker.clone()).await?;
        let backend = BackendFactory::from_config(&config.broker, config.backend.clone()).await?;

        tracing::debug!(
            task_queue = %config.broker.task_queue,
            event_queue = %config.broker.event_queue,
            "Client configured"
        );
        Ok(Self::new(broker, backend, config.workers.clone()))
    }

    /// Register `task` under `name` for the workers of this client.
    pub async fn register<T: Task>(&self, name: impl Into<String>, task: T) {
        self.pool.register(name, task).await;
    }

    /// Start the worker pool.
    ///
    /// The pool also stops when `shutdown` is cancelled.
    pub async fn start_workers(&self, shutdown: &CancellationToken) -> AnvilResult<()> {
        self.pool.start(shutdown).await
    }

    /// Stop the worker pool and wait for every worker to exit.
    pub async fn stop_workers(&self) -> AnvilResult<()> {
        self.pool.stop().await
    }

    /// Whether the worker pool is running.
    pub async fn is_running(&self) -> bool {
        self.pool.is_running().await
    }

    /// Enqueue a prepared message and return its id.
    pub async fn send_task(&self, message: &TaskMessage) -> AnvilResult<String> {
        self.broker.send(message).await?;
        tracing::debug!(task_id = %message.id(), task = %message.task_name(), "Task enqueued");
        Ok(message.id().to_string())
    }

    /// Enqueue a call of `task` with default headers and return its id.
    pub async fn delay(
        &self,
        task: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> AnvilResult<String> {
        self.send_task(&TaskMessage::new(task, args, kwargs)).await
    }

    /// Fetch the stored result of a task.
    pub async fn get_result(&self, task_id: &str) -> AnvilResult<ResultMessage> {
        self.backend.get(task_id).await
    }

    /// Worker pool counters.
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.pool.stats()
    }

    /// The broker in use.
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// The result backend in use.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Wait for Ctrl+C, then stop the workers gracefully.
    pub async fn wait_for_shutdown(&self) -> AnvilResult<()> {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| AnvilError::transport("Failed to listen for Ctrl+C", e))?;

        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        self.stop_workers().await
    }
}
