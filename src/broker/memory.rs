//! In-memory broker implementation.
//!
//! Tasks and events are kept as encoded JSON strings, exactly what a networked
//! store would hold, so encoding and decoding are exercised the same way as
//! with a real transport.
//!
//! # Features
//!
//! - **FIFO**: messages are received in the order they were sent
//! - **Blocking receive**: waiters are woken as soon as a message is sent
//! - **Inspectable**: emitted events can be read back, handy in tests

use super::Broker;
use crate::config::BrokerConfig;
use crate::error::AnvilResult;
use crate::protocol::{Event, TaskMessage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// In-memory broker implementation
#[derive(Debug)]
pub struct InMemoryBroker {
    /// Encoded task messages, oldest first
    tasks: Arc<Mutex<VecDeque<String>>>,
    /// Encoded events, oldest first
    events: Arc<Mutex<Vec<String>>>,
    /// Wakes receivers blocked on an empty queue
    notify: Arc<Notify>,
    /// Maximum time a receive call waits
    receive_timeout: Duration,
}

impl InMemoryBroker {
    /// Create a new in-memory broker with default configuration
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a new in-memory broker with custom configuration
    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(VecDeque::new())),
            events: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Notify::new()),
            receive_timeout: config.receive_timeout(),
        }
    }

    /// Push an already encoded payload onto the task queue.
    ///
    /// The payload is not validated; a malformed one surfaces as a
    /// serialization error on receive.
    pub async fn push_raw(&self, payload: impl Into<String>) {
        self.tasks.lock().await.push_back(payload.into());
        self.notify.notify_one();
    }

    /// Decode every event emitted so far, oldest first.
    pub async fn events(&self) -> AnvilResult<Vec<Event>> {
        let events = self.events.lock().await;
        events
            .iter()
            .map(|raw| Ok(serde_json::from_str(raw)?))
            .collect()
    }

    /// Raw encoded events, oldest first.
    pub async fn raw_events(&self) -> Vec<String> {
        self.events.lock().await.clone()
    }

    /// Number of task messages waiting to be received.
    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Drop every pending message and emitted event, returning how many were removed.
    pub async fn purge(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let mut events = self.events.lock().await;
        let removed = tasks.len() + events.len();
        tasks.clear();
        events.clear();
        removed
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(&self, message: &TaskMessage) -> AnvilResult<()> {
        let payload = message.to_json()?;
        self.push_raw(payload).await;

        tracing::debug!("Sent task message: {}", message.id());
        Ok(())
    }

    async fn receive(&self, token: &CancellationToken) -> AnvilResult<Option<TaskMessage>> {
        let deadline = Instant::now() + self.receive_timeout;

        loop {
            // Register interest before checking the queue so a send between
            // the check and the wait is not missed
            let notified = self.notify.notified();

            let popped = {
                let mut tasks = self.tasks.lock().await;
                if token.is_cancelled() {
                    return Ok(None);
                }
                tasks.pop_front()
            };

            if let Some(raw) = popped {
                let message = TaskMessage::from_json(&raw)?;
                tracing::debug!("Received task message: {}", message.id());
                return Ok(Some(message));
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                waited = tokio::time::timeout_at(deadline, notified) => {
                    if waited.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn emit(&self, event: &Event) -> AnvilResult<()> {
        let payload = serde_json::to_string(event)?;
        self.events.lock().await.push(payload);
        Ok(())
    }
}
