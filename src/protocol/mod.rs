//! Wire protocol shared with producers and workers written in other languages.
//!
//! Three kinds of records travel through the broker and the backend:
//!
//! - [`TaskMessage`]: one task invocation (`properties`, `headers`, `body`)
//! - [`Event`]: a lifecycle notification correlated to a message by id
//! - [`ResultMessage`]: the stored outcome of a successful execution
//!
//! All of them are JSON documents whose field names follow the Celery task
//! protocol, so they can be produced and consumed by other implementations.

use serde::{Deserialize, Deserializer};

pub mod event;
pub mod message;
pub mod repr;
pub mod result;

pub use event::{Event, EventKind, EventPayload};
pub use message::{Body, Embed, Headers, Properties, Signature, TaskMessage};
pub use result::{ResultMessage, TaskState};

/// Decode `null` as the type's default.
///
/// Go and Python producers serialize empty slices and maps as `null`.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
