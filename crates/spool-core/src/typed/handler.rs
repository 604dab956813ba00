//! Handler<T> - typed handlers adapted onto the untyped handler chain.
//!
//! `TypedHandler<T, H>` erases `T` so it can sit in the same ordered chain as
//! any other [`SpoolHandler`]. Tasks whose envelope names a different type are
//! answered with [`Verdict::NotMine`], passing them down the chain.

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::warn;

use super::task::{Task, TaskEnvelope};
use crate::domain::{SpoolTask, Verdict};
use crate::error::SpoolError;
use crate::ports::SpoolHandler;

#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn init(&self) -> Result<(), SpoolError> {
        Ok(())
    }

    async fn handle(&self, args: T, task: &SpoolTask) -> Verdict;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> SpoolHandler for TypedHandler<T, H> {
    fn name(&self) -> &str {
        T::TYPE
    }

    async fn init(&self) -> Result<(), SpoolError> {
        self.handler.init().await
    }

    async fn handle(&self, task: &SpoolTask) -> Verdict {
        let Some(envelope) = TaskEnvelope::from_metadata(task.metadata()) else {
            return Verdict::NotMine;
        };
        if envelope.task_type != T::TYPE {
            return Verdict::NotMine;
        }
        match serde_json::from_value::<T>(envelope.args) {
            Ok(args) => self.handler.handle(args, task).await,
            Err(e) => {
                // left in place so an operator can inspect it
                warn!(task = task.name(), task_type = T::TYPE, error = %e, "undecodable task arguments");
                Verdict::NotMine
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metadata, SpoolRecord};
    use crate::typed::task::fixtures::{Notify, Resize};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ResizeHandler {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Handler<Resize> for ResizeHandler {
        async fn handle(&self, args: Resize, _task: &SpoolTask) -> Verdict {
            self.seen.lock().unwrap().push(args.width);
            Verdict::Done
        }
    }

    fn task_with(metadata: Metadata) -> SpoolTask {
        SpoolTask::new("t", "/tmp/t", SpoolRecord::new(metadata, Vec::new()))
    }

    #[tokio::test]
    async fn matching_envelope_reaches_the_typed_handler() {
        let handler = TypedHandler::new(ResizeHandler::default());
        let meta = TaskEnvelope::wrap(&Resize { width: 320 })
            .unwrap()
            .into_metadata()
            .unwrap();

        assert_eq!(handler.handle(&task_with(meta)).await, Verdict::Done);
        assert_eq!(*handler.handler.seen.lock().unwrap(), vec![320]);
        assert_eq!(SpoolHandler::name(&handler), Resize::TYPE);
    }

    #[tokio::test]
    async fn other_task_types_are_not_mine() {
        let handler = TypedHandler::new(ResizeHandler::default());
        let meta = TaskEnvelope::wrap(&Notify {
            channel: "ops".into(),
        })
        .unwrap()
        .into_metadata()
        .unwrap();

        assert_eq!(handler.handle(&task_with(meta)).await, Verdict::NotMine);
        assert_eq!(
            handler
                .handle(&task_with(Metadata::try_from("PING").unwrap()))
                .await,
            Verdict::NotMine
        );
        assert!(handler.handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_arguments_are_left_alone() {
        let handler = TypedHandler::new(ResizeHandler::default());
        let meta = TaskEnvelope {
            task_type: Resize::TYPE.to_string(),
            args: serde_json::json!({ "width": "wide" }),
        }
        .into_metadata()
        .unwrap();

        assert_eq!(handler.handle(&task_with(meta)).await, Verdict::NotMine);
    }
}
