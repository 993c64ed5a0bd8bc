//! Execution Controller Layer
//!
//! Responsibilities:
//! - Run the stage handler for events routed by the dispatcher
//! - Own whatever execution resources that takes (threads, queues)
//! - Drain or cancel in-flight work on stop
//!
//! The dispatcher only sees normal return vs error from `execute`.

mod direct;
mod pool;

pub use direct::DirectController;
pub use pool::PoolController;

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::app::{Dispatcher, RuntimeStage};
use crate::common::{ControllerKind, Error, Event, Result, StageDefinition};

/// Controller trait for running stage handlers
///
/// Wiring (`set_dispatcher`, `set_runtime_stage`) happens before `start`.
/// `execute` may be called concurrently from any number of threads.
pub trait StageController: Send + Sync {
    /// Receive the owning dispatcher
    fn set_dispatcher(&self, dispatcher: Weak<Dispatcher>);

    /// Receive the runtime stage this controller executes
    fn set_runtime_stage(&self, stage: Weak<RuntimeStage>);

    /// Acquire execution resources
    fn start(&self) -> Result<()>;

    /// Release execution resources, draining or cancelling in-flight work
    fn stop(&self);

    /// Accept an event for execution
    fn execute(&self, event: Event) -> Result<()>;

    /// Get controller name
    fn name(&self) -> &'static str;
}

/// Creates a fresh controller for every stage on every dispatcher start
pub trait ControllerFactory: Send + Sync {
    fn create(&self, definition: &StageDefinition) -> Result<Arc<dyn StageController>>;
}

/// Factory building controllers from `StageConfig::controller`
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultControllerFactory;

impl ControllerFactory for DefaultControllerFactory {
    fn create(&self, definition: &StageDefinition) -> Result<Arc<dyn StageController>> {
        let controller: Arc<dyn StageController> = match &definition.config().controller {
            ControllerKind::Direct => Arc::new(DirectController::new()),
            ControllerKind::Pool {
                workers,
                queue_capacity,
            } => {
                if *workers == 0 || *queue_capacity == 0 {
                    return Err(Error::Config(format!(
                        "Pool controller for stage [{}] needs at least one worker and a non-empty queue",
                        definition.id()
                    )));
                }
                Arc::new(PoolController::new(*workers, *queue_capacity))
            }
        };
        Ok(controller)
    }
}

/// Back-references handed to a controller during wiring
#[derive(Default)]
pub(crate) struct Binding {
    dispatcher: RwLock<Weak<Dispatcher>>,
    stage: RwLock<Weak<RuntimeStage>>,
}

impl Binding {
    pub(crate) fn set_dispatcher(&self, dispatcher: Weak<Dispatcher>) {
        *self.dispatcher.write() = dispatcher;
    }

    pub(crate) fn set_stage(&self, stage: Weak<RuntimeStage>) {
        *self.stage.write() = stage;
    }

    pub(crate) fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.dispatcher.read().upgrade()
    }

    /// The bound stage, or an error naming the event's stage
    pub(crate) fn stage(&self, event_stage: &str) -> Result<Arc<RuntimeStage>> {
        self.stage
            .read()
            .upgrade()
            .ok_or_else(|| Error::controller(event_stage, "controller is not bound to a stage"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EventHandler;

    struct Noop;

    impl EventHandler for Noop {
        fn handle(&self, _event: &Event) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_factory_kinds() {
        let factory = DefaultControllerFactory;

        let direct = StageDefinition::new("a", Arc::new(Noop));
        assert_eq!(factory.create(&direct).unwrap().name(), "direct");

        let pool = StageDefinition::new("b", Arc::new(Noop)).with_controller(ControllerKind::pool(2, 8));
        assert_eq!(factory.create(&pool).unwrap().name(), "pool");
    }

    #[test]
    fn test_default_factory_rejects_empty_pool() {
        let factory = DefaultControllerFactory;
        let def = StageDefinition::new("b", Arc::new(Noop)).with_controller(ControllerKind::pool(0, 8));
        assert!(matches!(factory.create(&def), Err(Error::Config(_))));
    }

    #[test]
    fn test_unbound_binding() {
        let binding = Binding::default();
        assert!(binding.dispatcher().is_none());
        assert!(matches!(
            binding.stage("x"),
            Err(Error::Controller { stage, .. }) if stage == "x"
        ));
    }
}
