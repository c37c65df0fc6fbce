//! Task registry.
//!
//! Maps task names to their implementation. Written by explicit registration
//! calls, usually before the pool starts, and read concurrently by every
//! worker. Entries are never removed.
//!
//! # Examples
//!
//! ```rust
//! use anvilq::core::TaskRegistry;
//! use anvilq::task::TaskFn;
//! use serde_json::json;
//!
//! # async fn example() {
//! let registry = TaskRegistry::new();
//! registry
//!     .register("ping", TaskFn::new(|_args, _kwargs| async move { Ok(json!("pong")) }))
//!     .await;
//!
//! assert!(registry.get("ping").await.is_some());
//! assert!(registry.get("ghost").await.is_none());
//! # }
//! ```

use crate::error::{AnvilError, AnvilResult};
use crate::task::{Task, TaskExecutor};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry of named tasks.
#[derive(Default)]
pub struct TaskRegistry {
    /// Registered tasks by name
    tasks: RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry").finish_non_exhaustive()
    }
}

impl TaskRegistry {
    /// Create a new empty task registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under `name`.
    ///
    /// Names are unique: registering an existing name replaces the previous
    /// implementation.
    pub async fn register<T: Task>(&self, name: impl Into<String>, task: T) {
        self.register_executor(name, Arc::new(task)).await;
    }

    /// Register an already type-erased task under `name`.
    pub async fn register_executor(&self, name: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        let name = name.into();
        let previous = self.tasks.write().await.insert(name.clone(), executor);

        if previous.is_some() {
            tracing::warn!("Task {} was already registered, replacing it", name);
        } else {
            tracing::info!("Registered task: {}", name);
        }
    }

    /// Look up the task registered under `name`.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.tasks.read().await.get(name).cloned()
    }

    /// Look up the task registered under `name`, failing if it is unknown.
    pub async fn resolve(&self, name: &str) -> AnvilResult<Arc<dyn TaskExecutor>> {
        self.get(name).await.ok_or_else(|| AnvilError::TaskNotRegistered {
            name: name.to_string(),
        })
    }

    /// Whether a task is registered under `name`.
    pub async fn contains(&self, name: &str) -> bool {
        self.tasks.read().await.contains_key(name)
    }

    /// Names of all registered tasks, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether no task is registered.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}
