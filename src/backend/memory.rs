//! In-memory result backend.

use super::Backend;
use crate::error::{AnvilError, AnvilResult};
use crate::protocol::ResultMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory result backend implementation
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    /// Encoded results indexed by task id
    results: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a result is stored for `task_id`
    pub async fn contains(&self, task_id: &str) -> bool {
        self.results.read().await.contains_key(task_id)
    }

    /// Number of stored results
    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    /// Whether no result is stored
    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get(&self, task_id: &str) -> AnvilResult<ResultMessage> {
        let results = self.results.read().await;
        let raw = results
            .get(task_id)
            .ok_or_else(|| AnvilError::ResultNotFound {
                task_id: task_id.to_string(),
            })?;
        Ok(serde_json::from_str(raw)?)
    }

    async fn set(&self, task_id: &str, result: &ResultMessage) -> AnvilResult<()> {
        let payload = serde_json::to_string(result)?;
        self.results
            .write()
            .await
            .insert(task_id.to_string(), payload);

        tracing::debug!("Stored result for task {}", task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_then_get() {
        let backend = InMemoryBackend::new();
        let result = ResultMessage::success("abc-123", json!(5));

        backend.set("abc-123", &result).await.unwrap();

        assert!(backend.contains("abc-123").await);
        assert_eq!(backend.get("abc-123").await.unwrap(), result);
    }

    #[tokio::test]
    async fn test_missing_result_is_not_found() {
        let backend = InMemoryBackend::new();

        let err = backend.get("nope").await.unwrap_err();
        assert!(matches!(err, AnvilError::ResultNotFound { task_id } if task_id == "nope"));
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let backend = InMemoryBackend::new();
        backend.set("t", &ResultMessage::success("t", json!(1))).await.unwrap();
        backend.set("t", &ResultMessage::success("t", json!(2))).await.unwrap();

        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.get("t").await.unwrap().result, json!(2));
    }
}
