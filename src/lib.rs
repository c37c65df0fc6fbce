//! # anvilq
//!
//! An async worker pool speaking the Celery task-message and event protocol.
//!
//! ## Features
//!
//! - **Wire Compatible**: task messages, events and results use the Celery JSON
//!   layout, so producers and monitors written in other languages interoperate
//! - **Pluggable Transports**: brokers and result backends are traits, with
//!   in-memory and Redis implementations included
//! - **Type-Safe Tasks**: each task parses its arguments into its own type
//!   before running
//! - **Graceful Shutdown**: cancellation tokens stop the pollers, in-flight
//!   executions finish first
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use anvilq::prelude::*;
//! use serde_json::{Map, Value, json};
//!
//! struct Add;
//!
//! #[async_trait]
//! impl Task for Add {
//!     type Arguments = (i64, i64);
//!     type Output = i64;
//!
//!     fn parse_arguments(&self, args: &[Value], _kwargs: &Map<String, Value>) -> AnvilResult<(i64, i64)> {
//!         match args {
//!             [Value::Number(a), Value::Number(b)] => match (a.as_i64(), b.as_i64()) {
//!                 (Some(a), Some(b)) => Ok((a, b)),
//!                 _ => Err(AnvilError::validation("add", "expected integers")),
//!             },
//!             _ => Err(AnvilError::validation("add", "expected two numbers")),
//!         }
//!     }
//!
//!     async fn run(&self, operands: (i64, i64)) -> AnvilResult<i64> {
//!         Ok(operands.0 + operands.1)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> AnvilResult<()> {
//!     let config = AnvilConfig::development();
//!     config.logging.init()?;
//!
//!     let client = Client::from_config(&config).await?;
//!     client.register("add", Add).await;
//!     client.start_workers(&CancellationToken::new()).await?;
//!
//!     let id = client.delay("add", vec![json!(2), json!(3)], Map::new()).await?;
//!     println!("Enqueued task {}", id);
//!
//!     client.wait_for_shutdown().await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod broker;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod task;

pub mod prelude {
    pub use crate::backend::{Backend, BackendFactory, InMemoryBackend};
    pub use crate::broker::{Broker, BrokerFactory, InMemoryBroker};
    pub use crate::config::*;
    pub use crate::core::{Client, PoolStatsSnapshot, WorkerPool};
    pub use crate::error::{AnvilError, AnvilResult};
    pub use crate::protocol::{
        Event, EventKind, EventPayload, ResultMessage, Signature, TaskMessage, TaskState,
    };
    pub use crate::task::{Task, TaskExecutor, TaskFn, bind_kwargs};
    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;

    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    pub use crate::backend::RedisBackend;
    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    pub use crate::broker::RedisBroker;
}

pub use crate::config::*;
pub use crate::core::{Client, WorkerPool};
pub use crate::error::{AnvilError, AnvilResult};
pub use crate::protocol::{Event, ResultMessage, TaskMessage};
pub use crate::task::{Task, TaskFn};
pub use async_trait::async_trait;
