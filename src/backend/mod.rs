//! Result backends store the outcome of successful executions, keyed by the
//! message id.
//!
//! - **In-Memory**: a map guarded by an async lock
//! - **Redis**: one string key per task id, with an optional expiration

use crate::config::{BackendConfig, BrokerConfig, TransportConfig};
use crate::error::AnvilResult;
use crate::protocol::ResultMessage;
use async_trait::async_trait;
use std::sync::Arc;

pub mod memory;
pub use memory::InMemoryBackend;

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub mod redis;

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub use self::redis::RedisBackend;

/// Trait that all result backends must implement.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the stored result of a task.
    ///
    /// Fails with [`AnvilError::ResultNotFound`](crate::error::AnvilError::ResultNotFound)
    /// if nothing is stored under `task_id`.
    async fn get(&self, task_id: &str) -> AnvilResult<ResultMessage>;

    /// Store the result of a task, replacing any previous one.
    async fn set(&self, task_id: &str, result: &ResultMessage) -> AnvilResult<()>;
}

/// Factory methods for creating result backends
pub struct BackendFactory;

impl BackendFactory {
    /// Create an in-memory backend
    pub fn in_memory() -> Arc<dyn Backend> {
        Arc::new(InMemoryBackend::new())
    }

    /// Create the backend matching the broker transport
    pub async fn from_config(
        broker: &BrokerConfig,
        config: BackendConfig,
    ) -> AnvilResult<Arc<dyn Backend>> {
        match &broker.transport {
            TransportConfig::InMemory => {
                if config.result_ttl_secs.is_some() {
                    tracing::warn!("Result TTL is ignored by the in-memory backend");
                }
                Ok(Self::in_memory())
            }
            #[cfg(feature = "redis-queue")]
            TransportConfig::Redis(redis_config) => {
                let backend = RedisBackend::connect(redis_config, config).await?;
                Ok(Arc::new(backend))
            }
        }
    }
}
