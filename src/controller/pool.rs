//! Pool controller - bounded queue drained by dedicated worker threads
//!
//! ```text
//! execute() → try_send → [bounded queue] → worker-0..N → RuntimeStage::invoke
//! ```
//!
//! Workers are plain OS threads so the pool works with or without a tokio
//! runtime on the calling side.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::app::{Dispatcher, RuntimeStage};
use crate::common::{Error, Event, Result};

use super::{Binding, StageController};

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Event>>>;

/// Asynchronous controller backed by a fixed worker pool
///
/// `execute` only enqueues; handler errors are logged and counted in the
/// stage statistics. A full queue is reported as a controller error.
pub struct PoolController {
    workers: usize,
    queue_capacity: usize,
    binding: Binding,
    sender: RwLock<Option<mpsc::Sender<Event>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolController {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            binding: Binding::default(),
            sender: RwLock::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn spawn_workers(
        &self,
        stage: &Arc<RuntimeStage>,
        receiver: &SharedReceiver,
    ) -> Result<Vec<JoinHandle<()>>> {
        // Thread names: <context>-<stage>-<n>, or <stage>-<n> when unbound
        let prefix = match self.binding.dispatcher() {
            Some(dispatcher) => format!("{}-{}", dispatcher.context(), stage.id()),
            None => stage.id().to_string(),
        };

        let mut handles = Vec::with_capacity(self.workers);
        for n in 0..self.workers {
            let stage = stage.clone();
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", prefix, n))
                .spawn(move || worker_loop(stage, receiver))?;
            handles.push(handle);
        }
        Ok(handles)
    }
}

impl StageController for PoolController {
    fn set_dispatcher(&self, dispatcher: Weak<Dispatcher>) {
        self.binding.set_dispatcher(dispatcher);
    }

    fn set_runtime_stage(&self, stage: Weak<RuntimeStage>) {
        self.binding.set_stage(stage);
    }

    fn start(&self) -> Result<()> {
        let stage = self.binding.stage("<unbound>")?;
        let mut sender = self.sender.write();
        if sender.is_some() {
            return Err(Error::Lifecycle(format!(
                "Pool controller for stage [{}] is already started",
                stage.id()
            )));
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let receiver: SharedReceiver = Arc::new(Mutex::new(rx));

        // On a spawn failure the workers already running exit once `tx` drops
        let handles = self.spawn_workers(&stage, &receiver)?;

        debug!(
            "[{}] Pool started: {} workers, queue capacity {}",
            stage.id(),
            self.workers,
            self.queue_capacity
        );

        *sender = Some(tx);
        *self.handles.lock() = handles;
        Ok(())
    }

    fn stop(&self) {
        // Dropping the only sender closes the queue; workers drain what is left
        drop(self.sender.write().take());

        let handles = std::mem::take(&mut *self.handles.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                // stop() called from one of our own workers
                continue;
            }
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!("[{}] Worker panicked", name);
            }
        }
    }

    fn execute(&self, event: Event) -> Result<()> {
        let stage = self.binding.stage(event.stage())?;
        let routing = stage.routing_stats();

        let sender = self.sender.read();
        let Some(tx) = sender.as_ref() else {
            routing.record_rejected();
            return Err(Error::controller(stage.id(), "controller is stopped"));
        };

        routing.inc_pending();
        match tx.try_send(event) {
            Ok(()) => {
                routing.record_routed();
                Ok(())
            }
            Err(e) => {
                routing.dec_pending();
                routing.record_rejected();
                let reason = match e {
                    TrySendError::Full(_) => "queue is full",
                    TrySendError::Closed(_) => "controller is stopped",
                };
                Err(Error::controller(stage.id(), reason))
            }
        }
    }

    fn name(&self) -> &'static str {
        "pool"
    }
}

fn worker_loop(stage: Arc<RuntimeStage>, receiver: SharedReceiver) {
    loop {
        // Only one idle worker waits on the queue at a time
        let next = receiver.lock().blocking_recv();
        let Some(event) = next else {
            break;
        };
        stage.routing_stats().dec_pending();
        trace!("[{}] Worker picked up event", stage.id());
        // Failures are counted and logged by invoke()
        let _ = stage.invoke(&event);
    }
    trace!("[{}] Worker exiting", stage.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;

    use crate::common::{EventHandler, StageDefinition};

    #[derive(Default)]
    struct Count(AtomicUsize);

    impl EventHandler for Count {
        fn handle(&self, _event: &Event) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Gate(Mutex<std_mpsc::Receiver<()>>);

    impl EventHandler for Gate {
        fn handle(&self, _event: &Event) -> Result<()> {
            let _ = self.0.lock().recv();
            Ok(())
        }
    }

    fn bind(
        id: &str,
        handler: Arc<dyn EventHandler>,
        controller: Arc<PoolController>,
    ) -> Arc<RuntimeStage> {
        let definition = Arc::new(StageDefinition::new(id, handler.clone()));
        let stage = Arc::new(RuntimeStage::new(definition, handler, controller.clone()));
        controller.set_runtime_stage(Arc::downgrade(&stage));
        stage
    }

    #[test]
    fn test_pool_drains_on_stop() {
        let handler = Arc::new(Count::default());
        let controller = Arc::new(PoolController::new(3, 128));
        let stage = bind("work", handler.clone(), controller.clone());

        controller.start().unwrap();
        for i in 0..100 {
            controller.execute(Event::new("work", format!("e{}", i))).unwrap();
        }
        controller.stop();

        assert_eq!(handler.0.load(Ordering::SeqCst), 100);
        assert_eq!(stage.routing_stats().routed(), 100);
        assert_eq!(stage.routing_stats().pending(), 0);
        assert_eq!(stage.stage_stats().executed(), 100);
    }

    #[test]
    fn test_pool_rejects_when_full() {
        let (release, gate) = std_mpsc::channel();
        let handler = Arc::new(Gate(Mutex::new(gate)));
        let controller = Arc::new(PoolController::new(1, 1));
        let stage = bind("slow", handler, controller.clone());
        controller.start().unwrap();

        // One event in the worker, one in the queue: at least one of three must bounce
        let accepted = (0..3)
            .filter(|_| controller.execute(Event::new("slow", "x")).is_ok())
            .count();
        assert!(accepted < 3);
        assert_eq!(stage.routing_stats().rejected(), (3 - accepted) as u64);

        for _ in 0..accepted {
            release.send(()).unwrap();
        }
        controller.stop();
        assert_eq!(stage.stage_stats().executed(), accepted as u64);
    }

    #[test]
    fn test_pool_execute_after_stop_fails() {
        let controller = Arc::new(PoolController::new(1, 4));
        let _stage = bind("a", Arc::new(Count::default()), controller.clone());

        controller.start().unwrap();
        assert!(matches!(controller.start(), Err(Error::Lifecycle(_))));
        controller.stop();

        assert!(matches!(
            controller.execute(Event::new("a", "x")),
            Err(Error::Controller { .. })
        ));
    }

    #[test]
    fn test_pool_start_requires_binding() {
        let controller = PoolController::new(1, 4);
        assert!(controller.start().is_err());
    }
}
