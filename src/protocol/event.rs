//! Lifecycle events published on the event queue.
//!
//! Every event is a flat JSON object: the common fields (`event`, `uuid`,
//! `timestamp`, `type`, `hostname`) come first, followed by the fields of the
//! specific kind:
//!
//! ```text
//! {"event":"task-succeeded","uuid":"abc-123","timestamp":"...","type":"add","hostname":"worker0","result":5}
//! ```

use super::TaskMessage;
use super::null_as_default;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Message taken off the queue
    Received,
    /// Execution about to begin
    Started,
    /// Execution finished and the result was stored
    Succeeded,
    /// Execution failed
    Failed,
    /// Task revoked (never emitted by the worker pool)
    Revoked,
    /// Task scheduled for retry (never emitted by the worker pool)
    Retry,
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Received => "task-received",
            EventKind::Started => "task-started",
            EventKind::Succeeded => "task-succeeded",
            EventKind::Failed => "task-failed",
            EventKind::Revoked => "task-revoked",
            EventKind::Retry => "task-retry",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific part of an event, tagged by the `event` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event")]
pub enum EventPayload {
    /// Carries the original arguments
    #[serde(rename = "task-received")]
    Received {
        /// Positional arguments of the message
        #[serde(default, deserialize_with = "null_as_default")]
        args: Vec<Value>,
        /// Keyword arguments of the message
        #[serde(default, deserialize_with = "null_as_default")]
        kwargs: Map<String, Value>,
    },
    /// No extra fields
    #[serde(rename = "task-started")]
    Started,
    /// Carries the task's return value
    #[serde(rename = "task-succeeded")]
    Succeeded {
        /// Returned value
        #[serde(default)]
        result: Value,
    },
    /// Carries the error description
    #[serde(rename = "task-failed")]
    Failed {
        /// Error description
        exception: String,
        /// Traceback, empty when unavailable
        #[serde(default)]
        traceback: String,
    },
    /// No extra fields
    #[serde(rename = "task-revoked")]
    Revoked,
    /// Carries the error and the retry time
    #[serde(rename = "task-retry")]
    Retry {
        /// Error description
        exception: String,
        /// Traceback, empty when unavailable
        #[serde(default)]
        traceback: String,
        /// When the retry is due
        eta: DateTime<Utc>,
    },
}

impl EventPayload {
    /// Kind of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Received { .. } => EventKind::Received,
            EventPayload::Started => EventKind::Started,
            EventPayload::Succeeded { .. } => EventKind::Succeeded,
            EventPayload::Failed { .. } => EventKind::Failed,
            EventPayload::Revoked => EventKind::Revoked,
            EventPayload::Retry { .. } => EventKind::Retry,
        }
    }
}

/// A lifecycle notification correlated to one task message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Event {
    /// Message id
    pub uuid: String,
    /// When the event was created
    pub timestamp: DateTime<Utc>,
    /// Task name
    #[serde(rename = "type")]
    pub task_type: String,
    /// Identity of the emitting worker
    pub hostname: String,
    /// Kind-specific fields
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Create an event about `message` stamped with the current time.
    pub fn new(message: &TaskMessage, hostname: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            uuid: message.id().to_string(),
            timestamp: Utc::now(),
            task_type: message.task_name().to_string(),
            hostname: hostname.into(),
            payload,
        }
    }

    /// `task-received`, carrying the message arguments.
    pub fn received(message: &TaskMessage, hostname: impl Into<String>) -> Self {
        let payload = EventPayload::Received {
            args: message.body.args.clone(),
            kwargs: message.body.kwargs.clone(),
        };
        Self::new(message, hostname, payload)
    }

    /// `task-started`.
    pub fn started(message: &TaskMessage, hostname: impl Into<String>) -> Self {
        Self::new(message, hostname, EventPayload::Started)
    }

    /// `task-succeeded`, carrying the result.
    pub fn succeeded(message: &TaskMessage, hostname: impl Into<String>, result: Value) -> Self {
        Self::new(message, hostname, EventPayload::Succeeded { result })
    }

    /// `task-failed`, carrying the error description.
    pub fn failed(
        message: &TaskMessage,
        hostname: impl Into<String>,
        exception: impl Into<String>,
    ) -> Self {
        let payload = EventPayload::Failed {
            exception: exception.into(),
            traceback: String::new(),
        };
        Self::new(message, hostname, payload)
    }

    /// Kind of the event.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("event", self.kind().as_str())?;
        map.serialize_entry("uuid", &self.uuid)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.serialize_entry("type", &self.task_type)?;
        map.serialize_entry("hostname", &self.hostname)?;

        match &self.payload {
            EventPayload::Received { args, kwargs } => {
                map.serialize_entry("args", args)?;
                map.serialize_entry("kwargs", kwargs)?;
            }
            EventPayload::Succeeded { result } => {
                map.serialize_entry("result", result)?;
            }
            EventPayload::Failed {
                exception,
                traceback,
            } => {
                map.serialize_entry("exception", exception)?;
                map.serialize_entry("traceback", traceback)?;
            }
            EventPayload::Retry {
                exception,
                traceback,
                eta,
            } => {
                map.serialize_entry("exception", exception)?;
                map.serialize_entry("traceback", traceback)?;
                map.serialize_entry("eta", eta)?;
            }
            EventPayload::Started | EventPayload::Revoked => {}
        }

        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn message() -> TaskMessage {
        let kwargs = json!({"scale": 2}).as_object().cloned().unwrap();
        TaskMessage::new("add", vec![json!(2), json!(3)], kwargs).with_id("abc-123")
    }

    #[test]
    fn test_succeeded_wire_shape() {
        let mut event = Event::succeeded(&message(), "worker0", json!(5));
        event.timestamp = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let encoded = serde_json::to_string(&event).unwrap();
        assert_eq!(
            encoded,
            r#"{"event":"task-succeeded","uuid":"abc-123","timestamp":"2026-01-01T00:00:00Z","type":"add","hostname":"worker0","result":5}"#
        );
    }

    #[test]
    fn test_received_carries_arguments() {
        let event = Event::received(&message(), "worker1");
        let encoded = serde_json::to_value(&event).unwrap();

        assert_eq!(encoded["event"], "task-received");
        assert_eq!(encoded["args"], json!([2, 3]));
        assert_eq!(encoded["kwargs"], json!({"scale": 2}));
        assert_eq!(encoded["hostname"], "worker1");
    }

    #[test]
    fn test_started_has_only_base_fields() {
        let event = Event::started(&message(), "worker0");
        let encoded = serde_json::to_value(&event).unwrap();
        let keys: Vec<_> = encoded.as_object().unwrap().keys().cloned().collect();

        assert_eq!(keys.len(), 5);
        assert_eq!(event.kind(), EventKind::Started);
    }

    #[test]
    fn test_every_kind_round_trips() {
        let msg = message();
        let eta = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let events = vec![
            Event::received(&msg, "w"),
            Event::started(&msg, "w"),
            Event::succeeded(&msg, "w", json!({"sum": 5})),
            Event::failed(&msg, "w", "boom"),
            Event::new(&msg, "w", EventPayload::Revoked),
            Event::new(
                &msg,
                "w",
                EventPayload::Retry {
                    exception: "again".to_string(),
                    traceback: "line 1".to_string(),
                    eta,
                },
            ),
        ];

        for event in events {
            let encoded = serde_json::to_string(&event).unwrap();
            let decoded: Event = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn test_decode_foreign_failed_event() {
        let raw = r#"{"hostname":"celery@box","exception":"KeyError('x')","type":"lookup",
            "event":"task-failed","uuid":"u-1","timestamp":"2026-03-04T05:06:07.123456Z"}"#;

        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind(), EventKind::Failed);
        assert_eq!(event.uuid, "u-1");
        assert_eq!(
            event.payload,
            EventPayload::Failed {
                exception: "KeyError('x')".to_string(),
                traceback: String::new(),
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw = r#"{"event":"task-exploded","uuid":"u","timestamp":"2026-01-01T00:00:00Z","type":"t","hostname":"h"}"#;
        assert!(serde_json::from_str::<Event>(raw).is_err());
    }
}
