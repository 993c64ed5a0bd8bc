//! Direct controller - run the handler inline on the caller's thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use tracing::debug;

use crate::app::{Dispatcher, RuntimeStage};
use crate::common::{Error, Event, Result};

use super::{Binding, StageController};

/// Synchronous controller
///
/// `execute` returns only after the handler has run, and propagates
/// handler errors to the dispatcher's caller.
#[derive(Default)]
pub struct DirectController {
    binding: Binding,
    running: AtomicBool,
}

impl DirectController {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageController for DirectController {
    fn set_dispatcher(&self, dispatcher: Weak<Dispatcher>) {
        self.binding.set_dispatcher(dispatcher);
    }

    fn set_runtime_stage(&self, stage: Weak<RuntimeStage>) {
        self.binding.set_stage(stage);
    }

    fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn execute(&self, event: Event) -> Result<()> {
        let stage = self.binding.stage(event.stage())?;

        if !self.running.load(Ordering::Acquire) {
            stage.routing_stats().record_rejected();
            return Err(Error::controller(stage.id(), "controller is stopped"));
        }

        stage.routing_stats().record_routed();
        debug!("[{}] Executing inline", stage.id());
        stage.invoke(&event)
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use crate::common::{EventHandler, StageDefinition};
    use crate::controller::StageController;

    #[derive(Default)]
    struct Count(AtomicUsize);

    impl EventHandler for Count {
        fn handle(&self, _event: &Event) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_direct_runs_inline() {
        let handler = Arc::new(Count::default());
        let controller = Arc::new(DirectController::new());
        let definition = Arc::new(StageDefinition::new("a", handler.clone()));
        let stage = Arc::new(RuntimeStage::new(definition, handler.clone(), controller.clone()));

        controller.set_runtime_stage(Arc::downgrade(&stage));
        controller.start().unwrap();

        controller.execute(Event::new("a", "x")).unwrap();
        controller.execute(Event::new("a", "y")).unwrap();
        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
        assert_eq!(stage.routing_stats().routed(), 2);
        assert_eq!(stage.stage_stats().executed(), 2);

        controller.stop();
        assert!(controller.execute(Event::new("a", "z")).is_err());
        assert_eq!(stage.routing_stats().rejected(), 1);
        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_direct_unbound_fails() {
        let controller = DirectController::new();
        controller.start().unwrap();
        assert!(matches!(
            controller.execute(Event::new("a", "x")),
            Err(Error::Controller { .. })
        ));
    }
}
