//! Brokers carry task messages from producers to workers and lifecycle events
//! from workers to monitors.
//!
//! anvilq ships two brokers:
//! - **In-Memory**: in-process queues, for development, tests and single-process use
//! - **Redis**: Redis lists, interoperable with other Celery-protocol workers
//!
//! # Examples
//!
//! ```rust,no_run
//! use anvilq::broker::{Broker, InMemoryBroker};
//! use anvilq::protocol::TaskMessage;
//! use serde_json::{Map, json};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anvilq::AnvilResult<()> {
//! let broker = InMemoryBroker::new();
//! broker.send(&TaskMessage::new("add", vec![json!(2), json!(3)], Map::new())).await?;
//!
//! let message = broker.receive(&CancellationToken::new()).await?;
//! assert!(message.is_some());
//! # Ok(())
//! # }
//! ```

use crate::config::{BrokerConfig, TransportConfig};
use crate::error::AnvilResult;
use crate::protocol::{Event, TaskMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod memory;
pub use memory::InMemoryBroker;

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub mod redis;

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub use self::redis::RedisBroker;

/// Trait that all brokers must implement.
///
/// Implementations are shared by every worker of a pool and must be safe
/// for concurrent use.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a task message.
    ///
    /// Messages sent by one producer are received in the order they were sent.
    async fn send(&self, message: &TaskMessage) -> AnvilResult<()>;

    /// Remove and return the next task message.
    ///
    /// Blocks for at most the configured receive timeout and returns `None`
    /// if nothing arrived. Errors only on transport or decoding failure.
    ///
    /// Once `token` is cancelled no message is handed out: the call returns
    /// `None` and pending messages stay queued.
    async fn receive(&self, token: &CancellationToken) -> AnvilResult<Option<TaskMessage>>;

    /// Publish a lifecycle event on the event queue.
    async fn emit(&self, event: &Event) -> AnvilResult<()>;
}

/// Factory methods for creating brokers
pub struct BrokerFactory;

impl BrokerFactory {
    /// Create an in-memory broker
    pub fn in_memory(config: BrokerConfig) -> Arc<dyn Broker> {
        Arc::new(InMemoryBroker::with_config(config))
    }

    /// Create the broker described by `config.transport`
    pub async fn from_config(config: BrokerConfig) -> AnvilResult<Arc<dyn Broker>> {
        match &config.transport {
            TransportConfig::InMemory => Ok(Self::in_memory(config)),
            #[cfg(feature = "redis-queue")]
            TransportConfig::Redis(redis_config) => {
                let broker = RedisBroker::connect(redis_config, config.clone()).await?;
                Ok(Arc::new(broker))
            }
        }
    }
}
