//! Task trait - typed tasks stored as JSON metadata.
//!
//! The queue treats metadata as opaque bytes. This layer gives it a shape:
//! a [`TaskEnvelope`] naming the task type plus its serialized arguments.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::Metadata;
use crate::error::SpoolError;

/// Task ties a Rust type to a task_type string.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendMail {
///     to: String,
/// }
///
/// impl Task for SendMail {
///     const TYPE: &'static str = "mail.send.v1";
/// }
/// ```
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Naming convention: `{domain}.{action}.v{major}`.
    const TYPE: &'static str;
}

/// JSON layout of typed-task metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_type: String,
    pub args: serde_json::Value,
}

impl TaskEnvelope {
    pub fn wrap<T: Task>(task: &T) -> Result<Self, SpoolError> {
        Ok(Self {
            task_type: T::TYPE.to_string(),
            args: serde_json::to_value(task)?,
        })
    }

    pub fn into_metadata(self) -> Result<Metadata, SpoolError> {
        Metadata::to_json(&self)
    }

    /// `None` when the metadata is not a typed-task envelope at all.
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        metadata.from_json().ok()
    }
}
