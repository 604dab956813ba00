//! HandlerRegistry - the ordered handler chain.
//!
//! Built during initialization (mutable), used by the consumer (immutable).
//! Order matters: the first handler that claims a task wins.

use std::sync::Arc;

use tracing::debug;

use crate::error::SpoolError;
use crate::ports::SpoolHandler;
use crate::typed::{Handler, Task, TypedHandler};

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn SpoolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Append a handler to the chain. Names must be unique.
    pub fn register(&mut self, handler: Arc<dyn SpoolHandler>) -> Result<(), SpoolError> {
        if self.handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(SpoolError::DuplicateHandler(handler.name().to_string()));
        }
        self.handlers.push(handler);
        Ok(())
    }

    pub fn register_typed<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), SpoolError> {
        self.register(Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SpoolHandler>> {
        self.handlers.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler's init hook, in order. The first failure stops the consumer start.
    pub async fn init_all(&self) -> Result<(), SpoolError> {
        for handler in &self.handlers {
            debug!(handler = handler.name(), "initializing spooler handler");
            handler.init().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.iter().map(|h| h.name())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SpoolTask, Verdict};
    use crate::typed::task::fixtures::Resize;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Named(&'static str);

    #[async_trait]
    impl SpoolHandler for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn handle(&self, _task: &SpoolTask) -> Verdict {
            Verdict::NotMine
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl SpoolHandler for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn init(&self) -> Result<(), SpoolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn handle(&self, _task: &SpoolTask) -> Verdict {
            Verdict::NotMine
        }
    }

    struct Broken;

    #[async_trait]
    impl SpoolHandler for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn init(&self) -> Result<(), SpoolError> {
            Err(SpoolError::HandlerInit {
                handler: "broken".into(),
                reason: "no credentials".into(),
            })
        }

        async fn handle(&self, _task: &SpoolTask) -> Verdict {
            Verdict::NotMine
        }
    }

    struct ResizeHandler;

    #[async_trait]
    impl Handler<Resize> for ResizeHandler {
        async fn handle(&self, _args: Resize, _task: &SpoolTask) -> Verdict {
            Verdict::Done
        }
    }

    #[test]
    fn keeps_registration_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Named("b"))).unwrap();
        registry.register(Arc::new(Named("a"))).unwrap();
        registry.register_typed::<Resize, _>(ResizeHandler).unwrap();

        assert_eq!(registry.names(), vec!["b", "a", "image.resize.v1"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Named("a"))).unwrap();
        let err = registry.register(Arc::new(Named("a"))).unwrap_err();
        assert!(matches!(err, SpoolError::DuplicateHandler(name) if name == "a"));
    }

    #[tokio::test]
    async fn init_hooks_run_once_each() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Counting(calls.clone()))).unwrap();

        registry.init_all().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_init_hook_stops_initialization() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Broken)).unwrap();
        registry.register(Arc::new(Counting(calls.clone()))).unwrap();

        assert!(registry.init_all().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
