//! Redis result backend.
//!
//! Each result is stored as JSON under a key equal to the task id.

use super::Backend;
use crate::broker::redis::connect;
use crate::config::{BackendConfig, RedisConfig};
use crate::error::{AnvilError, AnvilResult};
use crate::protocol::ResultMessage;
use async_trait::async_trait;
use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use std::time::Duration;

/// Redis result backend implementation
#[derive(Clone)]
pub struct RedisBackend {
    /// Redis connection manager
    conn: ConnectionManager,
    /// Expiration policy
    config: BackendConfig,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect to Redis
    pub async fn connect(redis_config: &RedisConfig, config: BackendConfig) -> AnvilResult<Self> {
        let conn = connect(redis_config, Duration::ZERO).await?;
        Ok(Self::with_connection(conn, config))
    }

    /// Build a backend on top of an existing connection manager
    pub fn with_connection(conn: ConnectionManager, config: BackendConfig) -> Self {
        Self { conn, config }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn get(&self, task_id: &str) -> AnvilResult<ResultMessage> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(task_id).await?;

        let raw = raw.ok_or_else(|| AnvilError::ResultNotFound {
            task_id: task_id.to_string(),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn set(&self, task_id: &str, result: &ResultMessage) -> AnvilResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(result)?;

        let _: () = match self.config.result_ttl_secs {
            Some(ttl) => conn.set_ex(task_id, payload, ttl).await?,
            None => conn.set(task_id, payload).await?,
        };

        tracing::debug!("Stored result for task {}", task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Note: These tests require a running Redis instance

    async fn test_backend(config: BackendConfig) -> RedisBackend {
        let redis_config = RedisConfig {
            connection_string: "redis://localhost:6379".to_string(),
            connect_timeout_secs: 5,
        };
        RedisBackend::connect(&redis_config, config)
            .await
            .expect("Failed to connect to Redis")
    }

    #[tokio::test]
    #[ignore] // Ignore by default since it requires Redis
    async fn test_redis_set_then_get() {
        let backend = test_backend(BackendConfig::default()).await;
        let id = uuid::Uuid::new_v4().to_string();
        let result = ResultMessage::success(id.as_str(), json!({"sum": 5}));

        backend.set(&id, &result).await.unwrap();
        assert_eq!(backend.get(&id).await.unwrap(), result);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_missing_result() {
        let backend = test_backend(BackendConfig::default()).await;
        let err = backend.get("anvilq-missing-result").await.unwrap_err();
        assert!(matches!(err, AnvilError::ResultNotFound { .. }));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_result_ttl() {
        let backend = test_backend(BackendConfig::default().with_result_ttl(60)).await;
        let id = uuid::Uuid::new_v4().to_string();
        backend
            .set(&id, &ResultMessage::success(id.as_str(), json!(1)))
            .await
            .unwrap();

        let mut conn = backend.conn.clone();
        let ttl: i64 = conn.ttl(&id).await.unwrap();
        assert!(ttl > 0 && ttl <= 60);
    }
}
