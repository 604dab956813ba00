//! SpoolHandler - the call contract between the dispatcher and task code.

use async_trait::async_trait;

use crate::domain::{SpoolTask, Verdict};
use crate::error::SpoolError;

/// A handler is offered every claimed task, in registration order, until one
/// returns something other than [`Verdict::NotMine`].
///
/// # Example
/// ```ignore
/// struct Mailer;
///
/// #[async_trait]
/// impl SpoolHandler for Mailer {
///     fn name(&self) -> &str { "mailer" }
///
///     async fn handle(&self, task: &SpoolTask) -> Verdict {
///         if !task.metadata().as_bytes().starts_with(b"mail:") {
///             return Verdict::NotMine;
///         }
///         send(task.payload()).await;
///         Verdict::Done
///     }
/// }
/// ```
///
/// A handler that wants another go later returns [`Verdict::Retry`] after
/// persisting whatever progress it needs, typically by rewriting the file at
/// [`SpoolTask::path`]. The dispatcher holds an advisory lock on that file
/// while the handler runs, so handlers must not try to lock it themselves.
#[async_trait]
pub trait SpoolHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Runs once per consumer start, before the first pass.
    async fn init(&self) -> Result<(), SpoolError> {
        Ok(())
    }

    async fn handle(&self, task: &SpoolTask) -> Verdict;
}
