//! A single poller of the worker pool.
//!
//! Each worker wakes up on its own ticker, takes at most one message off the
//! broker and carries it through the execution lifecycle:
//!
//! ```text
//! polled -> received -> started -> succeeded (result stored)
//!                                \-> failed (no result)
//! ```
//!
//! Events are best effort: a failed emission is logged and never changes the
//! outcome of an execution. Task code runs on its own tokio task, so a panic
//! fails that one message and the worker keeps polling.

use super::pool::PoolStats;
use super::registry::TaskRegistry;
use crate::backend::Backend;
use crate::broker::Broker;
use crate::error::{AnvilError, AnvilResult};
use crate::protocol::{Event, ResultMessage, TaskMessage};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// Nothing was received, or the receive failed
    Idle,
    /// The task ran and its result was stored
    Succeeded,
    /// The task was unknown, rejected its arguments or returned an error
    Failed,
    /// The task ran but its result could not be stored
    ResultLost,
}

/// One poller of the pool.
pub struct Worker {
    id: usize,
    hostname: String,
    poll_interval: Duration,
    broker: Arc<dyn Broker>,
    backend: Arc<dyn Backend>,
    registry: Arc<TaskRegistry>,
    stats: Arc<PoolStats>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("hostname", &self.hostname)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Keeps the in-flight gauge up to date for the lifetime of an execution.
struct InFlight<'a>(&'a PoolStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a PoolStats) -> Self {
        stats.enter_flight();
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.leave_flight();
    }
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        hostname: String,
        poll_interval: Duration,
        broker: Arc<dyn Broker>,
        backend: Arc<dyn Backend>,
        registry: Arc<TaskRegistry>,
        stats: Arc<PoolStats>,
    ) -> Self {
        Self {
            id,
            hostname,
            poll_interval,
            broker,
            backend,
            registry,
            stats,
        }
    }

    /// Index of the worker in its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Identity reported in the events this worker emits.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Poll until `token` is cancelled.
    ///
    /// A waiting receive returns as soon as `token` is cancelled, so no
    /// execution starts afterwards. An execution already in progress always
    /// runs to completion.
    pub async fn run(self, token: CancellationToken) {
        info!(worker = %self.hostname, "Worker started");

        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let execution = self.poll_once(&token).await;
            if execution != Execution::Idle {
                debug!(worker = %self.hostname, ?execution, "Poll finished");
            }
        }

        info!(worker = %self.hostname, "Worker stopped");
    }

    /// Receive at most one message and execute it.
    pub async fn poll_once(&self, token: &CancellationToken) -> Execution {
        match self.broker.receive(token).await {
            Ok(Some(message)) => self.process(message).await,
            Ok(None) => Execution::Idle,
            Err(e) => {
                self.stats.record_receive_error();
                error!(worker = %self.hostname, error = %e, "Failed to receive task message");
                Execution::Idle
            }
        }
    }

    async fn process(&self, message: TaskMessage) -> Execution {
        let _in_flight = InFlight::enter(&self.stats);
        self.stats.record_received();

        let task_id = message.id().to_string();
        let task = message.task_name().to_string();
        debug!(worker = %self.hostname, %task_id, %task, "Received task message");

        self.emit(Event::received(&message, self.hostname.as_str())).await;
        self.emit(Event::started(&message, self.hostname.as_str())).await;

        let value = match self.execute(&message).await {
            Ok(value) => value,
            Err(e) => {
                self.stats.record_failed();
                error!(worker = %self.hostname, %task_id, %task, error = %e, "Task failed");
                self.emit(Event::failed(&message, self.hostname.as_str(), e.to_string()))
                    .await;
                return Execution::Failed;
            }
        };

        let result = ResultMessage::success(task_id.as_str(), value.clone());
        if let Err(e) = self.backend.set(&task_id, &result).await {
            // No terminal event: monitors see the task as started forever
            let e = AnvilError::ResultPersistence {
                task_id: task_id.clone(),
                source: Box::new(e),
            };
            self.stats.record_result_lost();
            error!(worker = %self.hostname, %task, error = ?e, "Result lost");
            return Execution::ResultLost;
        }

        self.stats.record_succeeded();
        debug!(worker = %self.hostname, %task_id, %task, "Task succeeded");
        self.emit(Event::succeeded(&message, self.hostname.as_str(), value))
            .await;
        Execution::Succeeded
    }

    async fn execute(&self, message: &TaskMessage) -> AnvilResult<Value> {
        let executor = self.registry.resolve(message.task_name()).await?;
        let args = message.body.args.clone();
        let kwargs = message.body.kwargs.clone();

        tokio::spawn(async move { executor.execute(&args, &kwargs).await })
            .await
            .unwrap_or_else(|e| Err(AnvilError::task_execution(panic_message(e))))
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.broker.emit(&event).await {
            warn!(
                worker = %self.hostname,
                task_id = %event.uuid,
                event = %event.kind(),
                error = %e,
                "Failed to emit event"
            );
        }
    }
}

/// Describe a task that did not return.
fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("task aborted: {}", err);
    }

    let payload = err.into_panic();
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("task panicked: {}", reason)
}
