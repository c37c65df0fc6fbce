//! Task message: the record a producer enqueues and a worker dequeues.

use super::null_as_default;
use super::repr::{args_repr, kwargs_repr};
use crate::error::AnvilResult;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// One unit of work as it travels through the broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMessage {
    /// Transport properties
    pub properties: Properties,
    /// Task metadata
    pub headers: Headers,
    /// Arguments and embedded follow-on signatures
    pub body: Body,
}

/// Transport-level properties of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Properties {
    /// Links the message to its results and events
    pub correlation_id: String,
    /// MIME type of the body
    pub content_type: String,
    /// Character encoding of the body
    pub content_encoding: String,
    /// Queue a reply should be sent to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// Task headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Headers {
    /// Language of the producer
    pub lang: String,
    /// Registered task name
    pub task: String,
    /// Message id
    pub id: String,
    /// Id of the first task in the workflow
    pub root_id: String,
    /// Id of the task that spawned this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Group the task belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Method name, for actor-style tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meth: Option<String>,
    /// Alternative name used in logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow: Option<String>,
    /// Earliest execution time, RFC 3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    /// Expiration time, RFC 3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    /// Number of times the task was retried
    pub retries: u32,
    /// Soft and hard time limits in seconds; carried, never enforced
    pub timelimit: [Option<Number>; 2],
    /// Human-readable positional arguments
    pub argsrepr: String,
    /// Human-readable keyword arguments
    pub kwargsrepr: String,
    /// `<name>@<host>` of the producer
    pub origin: String,
    /// How many times the task was replaced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced_task_nesting: Option<u32>,
}

/// Message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Body {
    /// Positional arguments
    #[serde(deserialize_with = "null_as_default")]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(deserialize_with = "null_as_default")]
    pub kwargs: Map<String, Value>,
    /// Follow-on signatures
    pub embed: Embed,
}

/// Signatures to run after the task. Transported only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Embed {
    /// Applied with the result on success
    #[serde(deserialize_with = "null_as_default")]
    pub callbacks: Vec<Signature>,
    /// Applied on failure
    #[serde(deserialize_with = "null_as_default")]
    pub errbacks: Vec<Signature>,
    /// Remaining tasks of a chain
    #[serde(deserialize_with = "null_as_default")]
    pub chain: Vec<Signature>,
    /// Chord body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chord: Option<Signature>,
}

/// Declarative description of a task call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signature {
    /// Task name
    pub task: String,
    /// Positional arguments
    #[serde(deserialize_with = "null_as_default")]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(deserialize_with = "null_as_default")]
    pub kwargs: Map<String, Value>,
}

impl Signature {
    /// Create a signature for `task` with the given arguments.
    pub fn new(task: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            task: task.into(),
            args,
            kwargs,
        }
    }
}

impl TaskMessage {
    /// Build a message invoking `task` with a fresh id.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use anvilq::protocol::TaskMessage;
    /// use serde_json::{Map, json};
    ///
    /// let message = TaskMessage::new("add", vec![json!(2), json!(3)], Map::new());
    /// assert_eq!(message.task_name(), "add");
    /// assert_eq!(message.headers.argsrepr, "(2, 3)");
    /// assert_eq!(message.properties.correlation_id, message.id());
    /// ```
    pub fn new(task: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();

        Self {
            properties: Properties {
                correlation_id: id.clone(),
                content_type: "application/json".to_string(),
                content_encoding: "utf-8".to_string(),
                reply_to: None,
            },
            headers: Headers {
                lang: "rust".to_string(),
                task: task.into(),
                id: id.clone(),
                root_id: id,
                argsrepr: args_repr(&args),
                kwargsrepr: kwargs_repr(&kwargs),
                origin: default_origin(),
                ..Default::default()
            },
            body: Body {
                args,
                kwargs,
                embed: Embed::default(),
            },
        }
    }

    /// Message id.
    pub fn id(&self) -> &str {
        &self.headers.id
    }

    /// Name of the task to run.
    pub fn task_name(&self) -> &str {
        &self.headers.task
    }

    /// Replace the generated id, keeping root and correlation ids in sync.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if self.headers.root_id == self.headers.id {
            self.headers.root_id = id.clone();
        }
        self.properties.correlation_id = id.clone();
        self.headers.id = id;
        self
    }

    /// Mark the message as spawned by `parent_id`, inside workflow `root_id`.
    pub fn with_parent(mut self, root_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        self.headers.root_id = root_id.into();
        self.headers.parent_id = Some(parent_id.into());
        self
    }

    /// Set the group id.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.headers.group = Some(group.into());
        self
    }

    /// Set the reply-to queue.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.properties.reply_to = Some(reply_to.into());
        self
    }

    /// Set the earliest execution time.
    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.headers.eta = Some(eta.to_rfc3339_opts(SecondsFormat::Micros, true));
        self
    }

    /// Set the expiration time.
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.headers.expires = Some(expires.to_rfc3339_opts(SecondsFormat::Micros, true));
        self
    }

    /// Set the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.headers.retries = retries;
        self
    }

    /// Set the soft and hard time limits in seconds.
    pub fn with_time_limit(mut self, soft: Option<u64>, hard: Option<u64>) -> Self {
        self.headers.timelimit = [soft.map(Number::from), hard.map(Number::from)];
        self
    }

    /// Set the producer origin.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.headers.origin = origin.into();
        self
    }

    /// Append a success callback.
    pub fn with_callback(mut self, signature: Signature) -> Self {
        self.body.embed.callbacks.push(signature);
        self
    }

    /// Append an error callback.
    pub fn with_errback(mut self, signature: Signature) -> Self {
        self.body.embed.errbacks.push(signature);
        self
    }

    /// Append a chained signature.
    pub fn with_chain(mut self, signature: Signature) -> Self {
        self.body.embed.chain.push(signature);
        self
    }

    /// Set the chord body.
    pub fn with_chord(mut self, signature: Signature) -> Self {
        self.body.embed.chord = Some(signature);
        self
    }

    /// Encode the message as JSON.
    pub fn to_json(&self) -> AnvilResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a message from JSON.
    pub fn from_json(data: &str) -> AnvilResult<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

fn default_origin() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("gen{}@{}", std::process::id(), host)
}
