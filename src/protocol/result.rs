//! Result records stored by the backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// State of a task as recorded in a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    /// Waiting for execution or unknown
    Pending,
    /// Received by a worker
    Received,
    /// Started by a worker
    Started,
    /// Completed successfully
    Success,
    /// Execution failed
    Failure,
    /// Scheduled for retry
    Retry,
    /// Revoked before execution
    Revoked,
}

impl TaskState {
    /// Wire representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Received => "RECEIVED",
            TaskState::Started => "STARTED",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Retry => "RETRY",
            TaskState::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a task, keyed by its id in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// Message id of the execution
    pub task_id: String,
    /// Final state
    pub status: TaskState,
    /// Value returned by the task
    pub result: Value,
}

impl ResultMessage {
    /// Result of a successful execution.
    pub fn success(task_id: impl Into<String>, result: Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskState::Success,
            result,
        }
    }
}
