//! Redis broker implementation.
//!
//! Task messages are `LPUSH`ed onto the task list and taken with `BRPOP`, so
//! the list behaves as a FIFO queue shared by every producer and worker.
//! Events are `LPUSH`ed onto a second list.
//!
//! A receive waits in short `BRPOP` slices so cancellation is noticed without
//! dropping a pop whose reply is still in flight.

use super::Broker;
use crate::config::{BrokerConfig, DurationExt, RedisConfig};
use crate::error::{AnvilError, AnvilResult};
use crate::protocol::{Event, TaskMessage};
use async_trait::async_trait;
use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Extra time granted to a blocking pop on top of its server-side timeout.
const RESPONSE_GRACE: Duration = Duration::from_secs(5);

/// Longest single `BRPOP`; bounds how late a cancellation is noticed.
const RECEIVE_SLICE: Duration = Duration::from_millis(250);

/// Shortest `BRPOP` timeout sent; a zero timeout would block forever.
const MIN_BLOCKING_WAIT: Duration = Duration::from_millis(10);

/// Open a connection manager whose response timeout outlasts a blocking pop.
pub(crate) async fn connect(
    redis_config: &RedisConfig,
    blocking_wait: Duration,
) -> AnvilResult<ConnectionManager> {
    let client = Client::open(redis_config.connection_string.as_str())
        .map_err(|e| AnvilError::transport(format!("Failed to create Redis client: {}", e), e))?;

    let connect_timeout = redis_config.connect_timeout_secs.secs();
    let manager_config = ConnectionManagerConfig::new()
        .set_connection_timeout(connect_timeout)
        .set_response_timeout(blocking_wait.min(RECEIVE_SLICE) + RESPONSE_GRACE);

    let conn = timeout(
        connect_timeout,
        client.get_connection_manager_with_config(manager_config),
    )
    .await
    .map_err(|e| AnvilError::transport("Timed out connecting to Redis", e))?
    .map_err(|e| AnvilError::transport(format!("Failed to connect to Redis: {}", e), e))?;

    debug!("Connected to Redis");
    Ok(conn)
}

/// Redis broker implementation
#[derive(Clone)]
pub struct RedisBroker {
    /// Redis connection manager
    conn: ConnectionManager,
    /// Queue names and receive timeout
    config: BrokerConfig,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Connect to Redis and use the queues named in `config`
    ///
    /// Fails with a configuration error if the receive timeout is zero.
    pub async fn connect(redis_config: &RedisConfig, config: BrokerConfig) -> AnvilResult<Self> {
        if config.receive_timeout_ms == 0 {
            return Err(AnvilError::config("Receive timeout must be greater than 0"));
        }
        let conn = connect(redis_config, config.receive_timeout()).await?;
        Ok(Self::with_connection(conn, config))
    }

    /// Build a broker on top of an existing connection manager
    pub fn with_connection(conn: ConnectionManager, config: BrokerConfig) -> Self {
        Self { conn, config }
    }

    /// Remove every pending task message and event
    pub async fn purge(&self) -> AnvilResult<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .del(&[self.config.task_queue.as_str(), self.config.event_queue.as_str()])
            .await?;
        Ok(removed)
    }

    /// Number of task messages waiting to be received
    pub async fn pending(&self) -> AnvilResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(&self.config.task_queue).await?;
        Ok(len)
    }

    async fn push(&self, queue: &str, payload: String) -> AnvilResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue, payload).await.map_err(|e| {
            error!("Failed to push to Redis list {}: {}", queue, e);
            AnvilError::transport(format!("Failed to push to {}", queue), e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn send(&self, message: &TaskMessage) -> AnvilResult<()> {
        let payload = message.to_json()?;
        self.push(&self.config.task_queue, payload).await?;

        debug!("Sent task message: {}", message.id());
        Ok(())
    }

    async fn receive(&self, token: &CancellationToken) -> AnvilResult<Option<TaskMessage>> {
        let mut conn = self.conn.clone();
        let queue = self.config.task_queue.as_str();
        let deadline = Instant::now() + self.config.receive_timeout().max(MIN_BLOCKING_WAIT);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if token.is_cancelled() || remaining.is_zero() {
                return Ok(None);
            }

            let wait = remaining.clamp(MIN_BLOCKING_WAIT, RECEIVE_SLICE);
            let popped: Option<(String, String)> = conn
                .brpop(queue, wait.as_secs_f64())
                .await
                .map_err(|e| AnvilError::transport(format!("Failed to pop task message: {}", e), e))?;

            let Some((_queue, raw)) = popped else {
                continue;
            };

            if token.is_cancelled() {
                // Put it back on the end BRPOP takes from
                let _: () = conn.rpush(queue, raw).await.map_err(|e| {
                    AnvilError::transport(format!("Failed to requeue task message: {}", e), e)
                })?;
                debug!("Receive cancelled, message requeued");
                return Ok(None);
            }

            let message = TaskMessage::from_json(&raw)?;
            debug!("Received task message: {}", message.id());
            return Ok(Some(message));
        }
    }

    async fn emit(&self, event: &Event) -> AnvilResult<()> {
        let payload = serde_json::to_string(event)?;
        self.push(&self.config.event_queue, payload).await
    }
}
