//! Built-in stage handlers and the name → handler registry
//!
//! Configuration files refer to handlers by name. Every stage gets its own
//! handler instance, since stage-aware handlers keep per-stage state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::app::Dispatcher;
use crate::common::{
    DispatcherAware, Error, Event, EventHandler, Result, StageAware, StageDefinition,
};

/// Property naming the stage a `ForwardHandler` sends to
pub const NEXT_STAGE_PROPERTY: &str = "next";

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn EventHandler> + Send + Sync>;

/// Named handler factories
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `log` and `forward`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("log", || Arc::new(LogHandler::new()) as Arc<dyn EventHandler>);
        registry.register("forward", || {
            Arc::new(ForwardHandler::new()) as Arc<dyn EventHandler>
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn EventHandler> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// New handler instance, or `None` for an unknown name
    pub fn create(&self, name: &str) -> Option<Arc<dyn EventHandler>> {
        self.factories.get(name).map(|factory| factory())
    }
}

/// Logs every event it receives
#[derive(Default)]
pub struct LogHandler {
    stage: RwLock<Option<String>>,
    handled: AtomicU64,
}

impl LogHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    fn stage_id(&self) -> String {
        self.stage
            .read()
            .clone()
            .unwrap_or_else(|| "?".to_string())
    }
}

impl EventHandler for LogHandler {
    fn handle(&self, event: &Event) -> Result<()> {
        self.handled.fetch_add(1, Ordering::Relaxed);
        match event.message().as_text() {
            Some(text) => info!("[{}] {}", self.stage_id(), text),
            None => info!("[{}] {:?}", self.stage_id(), event.message()),
        }
        Ok(())
    }

    fn as_stage_aware(&self) -> Option<&dyn StageAware> {
        Some(self)
    }
}

impl StageAware for LogHandler {
    fn set_stage(&self, stage: Arc<StageDefinition>) {
        *self.stage.write() = Some(stage.id().to_string());
    }
}

/// Re-submits every message to the stage named by the `next` property
#[derive(Default)]
pub struct ForwardHandler {
    next: RwLock<Option<String>>,
    dispatcher: RwLock<Weak<Dispatcher>>,
}

impl ForwardHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventHandler for ForwardHandler {
    fn handle(&self, event: &Event) -> Result<()> {
        let next = self.next.read().clone().ok_or_else(|| {
            Error::handler(format!(
                "stage [{}] has no '{}' property",
                event.stage(),
                NEXT_STAGE_PROPERTY
            ))
        })?;
        let dispatcher = self
            .dispatcher
            .read()
            .upgrade()
            .ok_or_else(|| Error::handler("dispatcher is gone"))?;

        debug!("[{}] Forwarding to [{}]", event.stage(), next);
        if dispatcher.execute(Event::new(next.clone(), event.message().clone()))? {
            Ok(())
        } else {
            Err(Error::handler(format!("stage [{}] rejected forwarded event", next)))
        }
    }

    fn as_stage_aware(&self) -> Option<&dyn StageAware> {
        Some(self)
    }

    fn as_dispatcher_aware(&self) -> Option<&dyn DispatcherAware> {
        Some(self)
    }
}

impl StageAware for ForwardHandler {
    fn set_stage(&self, stage: Arc<StageDefinition>) {
        *self.next.write() = stage
            .config()
            .property(NEXT_STAGE_PROPERTY)
            .map(str::to_string);
    }
}

impl DispatcherAware for ForwardHandler {
    fn set_dispatcher(&self, dispatcher: Weak<Dispatcher>) {
        *self.dispatcher.write() = dispatcher;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creates_fresh_instances() {
        let registry = HandlerRegistry::with_builtins();
        assert!(registry.create("forward").is_some());
        assert!(registry.create("nope").is_none());

        let a = registry.create("log").unwrap();
        let b = registry.create("log").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_forward_to_log() {
        let log = Arc::new(LogHandler::new());
        let dispatcher = Dispatcher::builder("fwd")
            .stage(StageDefinition::new("sink", log.clone()))
            .stage(
                StageDefinition::new("entry", Arc::new(ForwardHandler::new()))
                    .with_property(NEXT_STAGE_PROPERTY, "sink"),
            )
            .build();
        dispatcher.start().unwrap();

        assert!(dispatcher.execute_stage("entry", "hello").unwrap());
        assert_eq!(log.handled(), 1);
        // the forwarded event is counted too
        assert_eq!(dispatcher.total_event_executions(), 2);
        dispatcher.stop();
    }

    #[test]
    fn test_forward_without_next_fails() {
        let dispatcher = Dispatcher::builder("fwd")
            .stage(StageDefinition::new("entry", Arc::new(ForwardHandler::new())))
            .build();
        dispatcher.start().unwrap();

        assert!(matches!(
            dispatcher.execute_stage("entry", "hello"),
            Err(Error::Handler(_))
        ));
        dispatcher.stop();
    }

    #[test]
    fn test_forward_to_unknown_stage_is_invalid() {
        let dispatcher = Dispatcher::builder("fwd")
            .stage(
                StageDefinition::new("entry", Arc::new(ForwardHandler::new()))
                    .with_property(NEXT_STAGE_PROPERTY, "missing"),
            )
            .build();
        dispatcher.start().unwrap();

        assert!(matches!(
            dispatcher.execute_stage("entry", "hello"),
            Err(Error::InvalidStage { stage, .. }) if stage == "missing"
        ));
        dispatcher.stop();
    }
}
