//! Worker pool lifecycle.
//!
//! The pool owns the task registry and spawns one [`Worker`] per configured
//! slot. Its concurrency is bounded by the number of workers: each of them
//! executes at most one message at a time.

use super::registry::TaskRegistry;
use super::worker::Worker;
use crate::backend::Backend;
use crate::broker::Broker;
use crate::config::WorkerConfig;
use crate::error::{AnvilError, AnvilResult};
use crate::task::Task;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counters shared by every worker of a pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    results_lost: AtomicU64,
    receive_errors: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Messages taken off the broker
    pub received: u64,
    /// Executions whose result was stored
    pub succeeded: u64,
    /// Executions that ended with a task error
    pub failed: u64,
    /// Successful executions whose result could not be stored
    pub results_lost: u64,
    /// Failed receive calls
    pub receive_errors: u64,
    /// Executions currently running
    pub in_flight: usize,
    /// Highest number of simultaneous executions observed
    pub peak_in_flight: usize,
}

impl PoolStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_result_lost(&self) {
        self.results_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_flight(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    pub(crate) fn leave_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            results_lost: self.results_lost.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// Pollers of a started pool.
struct Running {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// A fixed-size pool of workers sharing one broker, backend and registry.
///
/// # Examples
///
/// ```rust,no_run
/// use anvilq::prelude::*;
/// use serde_json::json;
///
/// # async fn example() -> AnvilResult<()> {
/// let pool = WorkerPool::new(
///     BrokerFactory::in_memory(BrokerConfig::default()),
///     BackendFactory::in_memory(),
///     WorkerConfig::with_workers(4),
/// );
/// pool.register("ping", TaskFn::new(|_args, _kwargs| async move { Ok(json!("pong")) }))
///     .await;
///
/// let shutdown = CancellationToken::new();
/// pool.start(&shutdown).await?;
/// // ...
/// pool.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    backend: Arc<dyn Backend>,
    registry: Arc<TaskRegistry>,
    config: WorkerConfig,
    stats: Arc<PoolStats>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create a stopped pool.
    pub fn new(broker: Arc<dyn Broker>, backend: Arc<dyn Backend>, config: WorkerConfig) -> Self {
        Self {
            broker,
            backend,
            registry: Arc::new(TaskRegistry::new()),
            config,
            stats: Arc::new(PoolStats::default()),
            running: Mutex::new(None),
        }
    }

    /// Register `task` under `name`.
    ///
    /// Registration is also allowed while the pool runs; the task becomes
    /// visible to the next lookup.
    pub async fn register<T: Task>(&self, name: impl Into<String>, task: T) {
        self.registry.register(name, task).await;
    }

    /// Registry shared by the workers.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Spawn the workers.
    ///
    /// The workers stop when [`stop`](Self::stop) is called or when `parent`
    /// is cancelled, whichever comes first.
    pub async fn start(&self, parent: &CancellationToken) -> AnvilResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AnvilError::AlreadyRunning);
        }
        if self.config.num_workers == 0 {
            return Err(AnvilError::config("num_workers must be at least 1"));
        }

        let token = parent.child_token();
        let handles = (0..self.config.num_workers)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    self.config.hostname(id),
                    self.config.poll_interval(),
                    Arc::clone(&self.broker),
                    Arc::clone(&self.backend),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.stats),
                );
                tokio::spawn(worker.run(token.clone()))
            })
            .collect();

        *running = Some(Running { token, handles });

        tracing::info!(
            workers = self.config.num_workers,
            poll_interval_ms = self.config.poll_interval_ms,
            "Worker pool started"
        );
        Ok(())
    }

    /// Cancel the workers and wait for all of them to exit.
    ///
    /// Executions in progress are finished first. Fails with
    /// [`AnvilError::NotRunning`] if the pool was not started.
    pub async fn stop(&self) -> AnvilResult<()> {
        let Running { token, handles } =
            self.running.lock().await.take().ok_or(AnvilError::NotRunning)?;

        tracing::info!("Stopping worker pool...");
        token.cancel();

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker exited abnormally");
            }
        }

        tracing::info!(stats = ?self.stats.snapshot(), "Worker pool stopped");
        Ok(())
    }

    /// Whether the pool was started and not stopped yet.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::broker::InMemoryBroker;
    use crate::config::BrokerConfig;
    use crate::protocol::{Event, EventKind, EventPayload, ResultMessage, TaskMessage, TaskState};
    use crate::task::TaskFn;
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    struct Add;

    #[async_trait]
    impl Task for Add {
        type Arguments = (i64, i64);
        type Output = i64;

        fn parse_arguments(&self, args: &[Value], _kwargs: &Map<String, Value>) -> AnvilResult<(i64, i64)> {
            match args {
                [a, b] => match (a.as_i64(), b.as_i64()) {
                    (Some(a), Some(b)) => Ok((a, b)),
                    _ => Err(AnvilError::validation("add", "expected two integers")),
                },
                _ => Err(AnvilError::validation("add", "expected two arguments")),
            }
        }

        async fn run(&self, operands: (i64, i64)) -> AnvilResult<i64> {
            Ok(operands.0 + operands.1)
        }
    }

    /// Backend that refuses every write.
    struct BrokenBackend;

    #[async_trait]
    impl Backend for BrokenBackend {
        async fn get(&self, task_id: &str) -> AnvilResult<ResultMessage> {
            Err(AnvilError::ResultNotFound {
                task_id: task_id.to_string(),
            })
        }

        async fn set(&self, _task_id: &str, _result: &ResultMessage) -> AnvilResult<()> {
            Err(AnvilError::transport("backend down", std::io::Error::other("refused")))
        }
    }

    fn broker() -> Arc<InMemoryBroker> {
        Arc::new(InMemoryBroker::with_config(
            BrokerConfig::in_memory().with_receive_timeout(20),
        ))
    }

    fn config(workers: usize) -> WorkerConfig {
        WorkerConfig::with_workers(workers).with_poll_interval(5)
    }

    async fn wait_for(pool: &WorkerPool, done: impl Fn(&PoolStatsSnapshot) -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while !done(&pool.stats()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert_ok!(waited, "pool did not reach the expected state: {:?}", pool.stats());
    }

    async fn events_for(broker: &InMemoryBroker, id: &str) -> Vec<Event> {
        let events = assert_ok!(broker.events().await);
        events.into_iter().filter(|e| e.uuid == id).collect()
    }

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(Event::kind).collect()
    }

    #[tokio::test]
    async fn test_add_task_end_to_end() {
        let broker = broker();
        let backend = Arc::new(InMemoryBackend::new());
        let pool = WorkerPool::new(broker.clone(), backend.clone(), config(1));
        pool.register("add", Add).await;

        let message = TaskMessage::new("add", vec![json!(2), json!(3)], Map::new());
        assert_ok!(broker.send(&message).await);

        let shutdown = CancellationToken::new();
        assert_ok!(pool.start(&shutdown).await);
        wait_for(&pool, |s| s.succeeded == 1).await;
        assert_ok!(pool.stop().await);

        let stored = assert_ok!(backend.get(message.id()).await);
        assert_eq!(stored.status, TaskState::Success);
        assert_eq!(stored.result, json!(5));
        assert_eq!(stored.task_id, message.id());

        let events = events_for(&broker, message.id()).await;
        assert_eq!(
            kinds(&events),
            vec![EventKind::Received, EventKind::Started, EventKind::Succeeded]
        );
        assert!(events.iter().all(|e| e.hostname == "worker0" && e.task_type == "add"));
        assert_eq!(events[2].payload, EventPayload::Succeeded { result: json!(5) });
    }

    #[tokio::test]
    async fn test_unregistered_task_emits_failed() {
        let broker = broker();
        let backend = Arc::new(InMemoryBackend::new());
        let pool = WorkerPool::new(broker.clone(), backend.clone(), config(1));

        let message = TaskMessage::new("ghost", vec![], Map::new());
        assert_ok!(broker.send(&message).await);

        assert_ok!(pool.start(&CancellationToken::new()).await);
        wait_for(&pool, |s| s.failed == 1).await;
        assert_ok!(pool.stop().await);

        let events = events_for(&broker, message.id()).await;
        assert_eq!(
            kinds(&events),
            vec![EventKind::Received, EventKind::Started, EventKind::Failed]
        );
        match &events[2].payload {
            EventPayload::Failed { exception, .. } => {
                assert_eq!(exception, "task ghost is not registered")
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert_err!(backend.get(message.id()).await);
    }

    #[tokio::test]
    async fn test_invalid_arguments_emit_failed() {
        let broker = broker();
        let backend = Arc::new(InMemoryBackend::new());
        let pool = WorkerPool::new(broker.clone(), backend.clone(), config(1));
        pool.register("add", Add).await;

        let message = TaskMessage::new("add", vec![json!("two"), json!(3)], Map::new());
        assert_ok!(broker.send(&message).await);

        assert_ok!(pool.start(&CancellationToken::new()).await);
        wait_for(&pool, |s| s.failed == 1).await;
        assert_ok!(pool.stop().await);

        let events = events_for(&broker, message.id()).await;
        match &events[2].payload {
            EventPayload::Failed { exception, .. } => {
                assert!(exception.contains("expected two integers"))
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_task_error_message_is_forwarded() {
        let broker = broker();
        let backend = Arc::new(InMemoryBackend::new());
        let pool = WorkerPool::new(broker.clone(), backend.clone(), config(1));
        pool.register(
            "explode",
            TaskFn::new(|_args, _kwargs| async move { Err(AnvilError::task_execution("boom")) }),
        )
        .await;

        let message = TaskMessage::new("explode", vec![], Map::new());
        assert_ok!(broker.send(&message).await);

        assert_ok!(pool.start(&CancellationToken::new()).await);
        wait_for(&pool, |s| s.failed == 1).await;
        assert_ok!(pool.stop().await);

        let events = events_for(&broker, message.id()).await;
        assert_eq!(
            events[2].payload,
            EventPayload::Failed {
                exception: "boom".to_string(),
                traceback: String::new(),
            }
        );
        assert!(!backend.contains(message.id()).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded_by_worker_count() {
        let broker = broker();
        let backend = Arc::new(InMemoryBackend::new());
        let pool = WorkerPool::new(broker.clone(), backend.clone(), config(3));
        pool.register(
            "slow",
            TaskFn::new(|_args, _kwargs| async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(Value::Null)
            }),
        )
        .await;

        for _ in 0..9 {
            assert_ok!(broker.send(&TaskMessage::new("slow", vec![], Map::new())).await);
        }

        assert_ok!(pool.start(&CancellationToken::new()).await);
        wait_for(&pool, |s| s.succeeded == 9).await;
        assert_ok!(pool.stop().await);

        let stats = pool.stats();
        assert!(stats.peak_in_flight >= 1 && stats.peak_in_flight <= 3);
        assert_eq!(stats.in_flight, 0);

        let hostnames: HashSet<String> = assert_ok!(broker.events().await)
            .into_iter()
            .map(|e| e.hostname)
            .collect();
        assert!(hostnames.iter().all(|h| ["worker0", "worker1", "worker2"].contains(&h.as_str())));
    }

    #[tokio::test]
    async fn test_start_and_stop_lifecycle() {
        let pool = WorkerPool::new(broker(), Arc::new(InMemoryBackend::new()), config(2));
        let shutdown = CancellationToken::new();

        assert!(!pool.is_running().await);
        assert!(matches!(pool.stop().await, Err(AnvilError::NotRunning)));

        assert_ok!(pool.start(&shutdown).await);
        assert!(pool.is_running().await);
        assert!(matches!(pool.start(&shutdown).await, Err(AnvilError::AlreadyRunning)));

        assert_ok!(pool.stop().await);
        assert!(!pool.is_running().await);
        assert!(matches!(pool.stop().await, Err(AnvilError::NotRunning)));

        // A stopped pool can be started again
        assert_ok!(pool.start(&shutdown).await);
        assert_ok!(pool.stop().await);
    }

    #[tokio::test]
    async fn test_zero_workers_is_rejected() {
        let pool = WorkerPool::new(broker(), Arc::new(InMemoryBackend::new()), config(0));
        assert!(matches!(
            pool.start(&CancellationToken::new()).await,
            Err(AnvilError::Config { .. })
        ));
        assert!(!pool.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_execution() {
        let broker = broker();
        let backend = Arc::new(InMemoryBackend::new());
        let pool = WorkerPool::new(broker.clone(), backend.clone(), config(1));
        pool.register(
            "slow",
            TaskFn::new(|_args, _kwargs| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!("done"))
            }),
        )
        .await;

        let message = TaskMessage::new("slow", vec![], Map::new());
        assert_ok!(broker.send(&message).await);

        assert_ok!(pool.start(&CancellationToken::new()).await);
        wait_for(&pool, |s| s.in_flight == 1).await;
        assert_ok!(pool.stop().await);

        assert_eq!(pool.stats().succeeded, 1);
        let stored = assert_ok!(backend.get(message.id()).await);
        assert_eq!(stored.result, json!("done"));
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_workers() {
        let broker = broker();
        let pool = WorkerPool::new(broker.clone(), Arc::new(InMemoryBackend::new()), config(2));
        let shutdown = CancellationToken::new();

        assert_ok!(pool.start(&shutdown).await);
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Messages sent after cancellation stay queued
        assert_ok!(broker.send(&TaskMessage::new("add", vec![], Map::new())).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.pending().await, 1);

        let stopped = tokio::time::timeout(Duration::from_secs(1), pool.stop()).await;
        assert_ok!(assert_ok!(stopped));
    }

    #[tokio::test]
    async fn test_nothing_runs_after_cancellation() {
        let broker = Arc::new(InMemoryBroker::with_config(
            BrokerConfig::in_memory().with_receive_timeout(500),
        ));
        let backend = Arc::new(InMemoryBackend::new());
        let pool = WorkerPool::new(broker.clone(), backend.clone(), config(1));
        pool.register("add", Add).await;

        let shutdown = CancellationToken::new();
        assert_ok!(pool.start(&shutdown).await);
        // Let the worker block inside receive
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        let message = TaskMessage::new("add", vec![json!(1), json!(2)], Map::new());
        assert_ok!(broker.send(&message).await);
        assert_ok!(pool.stop().await);

        assert_eq!(pool.stats().received, 0);
        assert_eq!(broker.pending().await, 1);
        assert!(broker.raw_events().await.is_empty());
        assert!(!backend.contains(message.id()).await);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let broker = broker();
        let backend = Arc::new(InMemoryBackend::new());
        let pool = WorkerPool::new(broker.clone(), backend.clone(), config(1));
        pool.register(
            "explode",
            TaskFn::new(|args, _kwargs| async move {
                if args.is_empty() {
                    panic!("kaboom");
                }
                Ok(Value::Null)
            }),
        )
        .await;
        pool.register("add", Add).await;

        let boom = TaskMessage::new("explode", vec![], Map::new());
        let good = TaskMessage::new("add", vec![json!(4), json!(5)], Map::new());
        assert_ok!(broker.send(&boom).await);
        assert_ok!(broker.send(&good).await);

        assert_ok!(pool.start(&CancellationToken::new()).await);
        wait_for(&pool, |s| s.succeeded == 1).await;
        assert_ok!(pool.stop().await);

        let events = events_for(&broker, boom.id()).await;
        assert_eq!(
            kinds(&events),
            vec![EventKind::Received, EventKind::Started, EventKind::Failed]
        );
        match &events[2].payload {
            EventPayload::Failed { exception, .. } => assert!(exception.contains("kaboom")),
            other => panic!("unexpected payload: {other:?}"),
        }
        assert_eq!(assert_ok!(backend.get(good.id()).await).result, json!(9));
        assert_eq!(pool.stats().failed, 1);
        assert_eq!(broker.pending().await, 0);
    }

    #[tokio::test]
    async fn test_idle_pool_emits_nothing() {
        let broker = broker();
        let pool = WorkerPool::new(broker.clone(), Arc::new(InMemoryBackend::new()), config(2));

        assert_ok!(pool.start(&CancellationToken::new()).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_ok!(pool.stop().await);

        assert!(broker.raw_events().await.is_empty());
        assert_eq!(pool.stats(), PoolStatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_receive_errors_do_not_stop_workers() {
        let broker = broker();
        let backend = Arc::new(InMemoryBackend::new());
        let pool = WorkerPool::new(broker.clone(), backend.clone(), config(1));
        pool.register("add", Add).await;

        broker.push_raw("this is not a task message").await;
        let message = TaskMessage::new("add", vec![json!(1), json!(1)], Map::new());
        assert_ok!(broker.send(&message).await);

        assert_ok!(pool.start(&CancellationToken::new()).await);
        wait_for(&pool, |s| s.succeeded == 1).await;
        assert_ok!(pool.stop().await);

        assert_eq!(pool.stats().receive_errors, 1);
        assert_eq!(assert_ok!(backend.get(message.id()).await).result, json!(2));
    }

    #[tokio::test]
    async fn test_lost_result_emits_no_terminal_event() {
        let broker = broker();
        let pool = WorkerPool::new(broker.clone(), Arc::new(BrokenBackend), config(1));
        pool.register("add", Add).await;

        let message = TaskMessage::new("add", vec![json!(2), json!(3)], Map::new());
        assert_ok!(broker.send(&message).await);

        assert_ok!(pool.start(&CancellationToken::new()).await);
        wait_for(&pool, |s| s.results_lost == 1).await;
        assert_ok!(pool.stop().await);

        let events = events_for(&broker, message.id()).await;
        assert_eq!(kinds(&events), vec![EventKind::Received, EventKind::Started]);

        let stats = pool.stats();
        assert_eq!(stats.succeeded, 0);
        assert_eq!(stats.failed, 0);
    }
}
