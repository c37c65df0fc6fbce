//! Task definition and execution traits.
//!
//! A task is registered once under a unique name and then shared by every
//! worker of the pool. Execution happens in two steps: the message arguments
//! are parsed into the task's own argument type, then the task runs with them.

use crate::error::{AnvilError, AnvilResult};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use std::marker::PhantomData;

/// Trait that all tasks must implement to be executable by the worker pool.
///
/// # Examples
///
/// ```rust
/// use anvilq::prelude::*;
/// use serde_json::{Map, Value};
///
/// struct Add;
///
/// #[async_trait]
/// impl Task for Add {
///     type Arguments = Vec<i64>;
///     type Output = i64;
///
///     fn parse_arguments(&self, args: &[Value], _kwargs: &Map<String, Value>) -> AnvilResult<Vec<i64>> {
///         args.iter()
///             .map(|v| v.as_i64().ok_or_else(|| AnvilError::validation("add", "expected integers")))
///             .collect()
///     }
///
///     async fn run(&self, numbers: Vec<i64>) -> AnvilResult<i64> {
///         Ok(numbers.iter().sum())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Arguments bound from a message
    type Arguments: Send;

    /// The output type returned by this task
    type Output: Serialize + Send;

    /// Validate and bind the message arguments.
    ///
    /// Fails with [`AnvilError::ArgumentValidation`] on a type mismatch or
    /// a missing required key.
    fn parse_arguments(
        &self,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> AnvilResult<Self::Arguments>;

    /// Execute the task with previously parsed arguments.
    async fn run(&self, arguments: Self::Arguments) -> AnvilResult<Self::Output>;
}

/// Object-safe view of a [`Task`] used by the registry.
///
/// Implemented for every `Task`; there is no need to implement it by hand.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Parse the arguments, run the task and encode its output.
    async fn execute(&self, args: &[Value], kwargs: &Map<String, Value>) -> AnvilResult<Value>;
}

#[async_trait]
impl<T: Task> TaskExecutor for T {
    async fn execute(&self, args: &[Value], kwargs: &Map<String, Value>) -> AnvilResult<Value> {
        let arguments = self.parse_arguments(args, kwargs)?;
        let output = self.run(arguments).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Bind keyword arguments to a deserializable struct.
///
/// Serde errors become [`AnvilError::ArgumentValidation`] for `task`.
pub fn bind_kwargs<T: DeserializeOwned>(task: &str, kwargs: &Map<String, Value>) -> AnvilResult<T> {
    serde_json::from_value(Value::Object(kwargs.clone()))
        .map_err(|e| AnvilError::validation(task, e.to_string()))
}

/// Task backed by an async closure over the raw arguments.
///
/// The closure receives the positional and keyword arguments untouched, so
/// argument parsing never fails; validation is up to the closure.
///
/// ```rust
/// use anvilq::task::TaskFn;
/// use serde_json::json;
///
/// let echo = TaskFn::new(|args, _kwargs| async move { Ok(json!(args)) });
/// ```
pub struct TaskFn<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> TaskFn<F, Fut>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AnvilResult<Value>> + Send + 'static,
{
    /// Wrap `f` as a task.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F, Fut>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AnvilResult<Value>> + Send + 'static,
{
    type Arguments = (Vec<Value>, Map<String, Value>);
    type Output = Value;

    fn parse_arguments(
        &self,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> AnvilResult<Self::Arguments> {
        Ok((args.to_vec(), kwargs.clone()))
    }

    async fn run(&self, arguments: Self::Arguments) -> AnvilResult<Value> {
        let (args, kwargs) = arguments;
        (self.f)(args, kwargs).await
    }
}
