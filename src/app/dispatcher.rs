//! Dispatcher - Core Routing and Lifecycle
//!
//! The dispatcher is the heart of the staged architecture.
//! It routes every event to the controller of its stage:
//!
//! ```text
//! execute(Event)
//!      ↓
//! running? ── no ──→ Ok(false)
//!      ↓
//! StageRegistry.get(event.stage) ── missing ──→ strict: Err(InvalidStage)
//!      ↓                                       lenient: Ok(false)
//! StageController.execute(event)
//!      ↓
//! execution counter += 1 → Ok(true)
//! ```
//!
//! The dispatcher runs no threads of its own. `execute` is lock-free: the
//! registry is an immutable snapshot published once `start` has built it.
//! `start` and `stop` are single-writer and must not race each other.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::common::{Error, Event, Message, Result, StageDefinition};
use crate::controller::{ControllerFactory, DefaultControllerFactory};

use super::metrics::{
    format_micros, DISPATCHER_EVENTS_ACCEPTED, DISPATCHER_EVENTS_REJECTED,
    DISPATCHER_INVALID_STAGE, REJECT_NOT_RUNNING, REJECT_UNKNOWN_STAGE,
};
use super::monitor::{dispatcher_name, routing_name, stage_name, Monitor, NoopMonitor};
use super::registry::StageRegistry;
use super::runtime_stage::RuntimeStage;
use super::stats_api::DispatcherStats;

/// Reason attached to `Error::InvalidStage` for unknown keys
pub const UNDEFINED_STAGE_REASON: &str = "stage is undefined";

/// Dispatcher routes events to stage controllers
///
/// Responsibilities:
/// - Build the stage registry and start every controller (`start`)
/// - Resolve stage ids and delegate events (`execute`)
/// - Stop controllers and release monitoring handles (`stop`)
/// - Count accepted events
///
/// Always handled through an `Arc`, see [`DispatcherBuilder::build`].
pub struct Dispatcher {
    context: String,
    stages: RwLock<Vec<Arc<StageDefinition>>>,
    strict_stage_resolution: AtomicBool,
    registry: ArcSwapOption<StageRegistry>,
    started: AtomicBool,
    shutdown_required: AtomicBool,
    stats: Arc<DispatcherStats>,
    monitor: Arc<dyn Monitor>,
    controller_factory: Arc<dyn ControllerFactory>,
    self_ref: Weak<Dispatcher>,
}

impl Dispatcher {
    pub fn builder(context: impl Into<String>) -> DispatcherBuilder {
        DispatcherBuilder::new(context)
    }

    /// Route an event to its stage
    ///
    /// Returns `Ok(true)` once the stage controller accepted the event,
    /// `Ok(false)` when the dispatcher is not running or, in lenient mode,
    /// when the stage is unknown. Controller errors are passed through.
    pub fn execute(&self, event: Event) -> Result<bool> {
        if !self.is_running() {
            info!(
                "Stage execution rejected for stage [{}], dispatcher [{}] is not running",
                event.stage(),
                self.context
            );
            DISPATCHER_EVENTS_REJECTED
                .with_label_values(&[self.context.as_str(), REJECT_NOT_RUNNING])
                .inc();
            return Ok(false);
        }

        let Some(stage) = self.stage(event.stage()) else {
            if self.is_strict_stage_resolution() {
                DISPATCHER_INVALID_STAGE
                    .with_label_values(&[self.context.as_str()])
                    .inc();
                return Err(Error::invalid_stage(event.stage, UNDEFINED_STAGE_REASON));
            }
            debug!(
                "[{}] Dropping event for undefined stage [{}]",
                self.context,
                event.stage()
            );
            DISPATCHER_EVENTS_REJECTED
                .with_label_values(&[self.context.as_str(), REJECT_UNKNOWN_STAGE])
                .inc();
            return Ok(false);
        };

        // Delegate to the stage controller; it may run, queue or refuse
        stage.controller().execute(event)?;

        self.stats.record_execution();
        DISPATCHER_EVENTS_ACCEPTED
            .with_label_values(&[self.context.as_str()])
            .inc();
        Ok(true)
    }

    /// Route a message to a stage
    pub fn execute_stage(&self, stage: impl Into<String>, message: impl Into<Message>) -> Result<bool> {
        self.execute(Event::new(stage, message))
    }

    /// Build the registry and start every stage controller
    ///
    /// Definitions are validated before anything is started: a missing
    /// handler or a duplicate id fails with `Error::Config` and no side
    /// effects. If a controller fails to start, the stages started so far
    /// are stopped again and the error is returned.
    pub fn start(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(Error::Lifecycle(format!(
                "Dispatcher [{}] is already started",
                self.context
            )));
        }

        let definitions = self.stages.read().clone();
        self.validate(&definitions)?;

        let mut registry = StageRegistry::with_capacity(definitions.len());
        for definition in &definitions {
            let started = self
                .start_stage(definition)
                .and_then(|stage| registry.insert(stage));
            if let Err(e) = started {
                error!(
                    "[{}] Failed to start stage [{}]: {}",
                    self.context,
                    definition.id(),
                    e
                );
                self.shutdown_stages(&registry);
                return Err(e);
            }
        }

        let stage_count = registry.len();
        let registry_is_empty = registry.is_empty();
        let stage_ids = registry.ids().collect::<Vec<_>>().join(", ");
        self.stats.set_stage_count(stage_count);
        self.monitor
            .register(&dispatcher_name(&self.context), self.stats.clone());

        self.registry.store(Some(Arc::new(registry)));
        self.shutdown_required.store(false, Ordering::Release);
        self.started.store(true, Ordering::Release);
        self.stats.set_running(true);

        if registry_is_empty {
            warn!("Dispatcher [{}] started without stages", self.context);
        } else {
            info!(
                "Dispatcher [{}] started with {} stages: [{}]",
                self.context, stage_count, stage_ids
            );
        }
        Ok(())
    }

    /// Stop accepting events and release every stage
    ///
    /// Events already inside a controller are left to that controller's stop.
    /// The dispatcher can be started again afterwards.
    pub fn stop(&self) {
        self.shutdown_required.store(true, Ordering::Release);
        self.stats.set_running(false);

        if let Some(registry) = self.registry.load_full() {
            self.shutdown_stages(&registry);
        }
        self.monitor.unregister(&dispatcher_name(&self.context));

        self.registry.store(None);
        self.started.store(false, Ordering::Release);
        self.shutdown_required.store(false, Ordering::Release);

        info!(
            "Dispatcher [{}] stopped after {} executions",
            self.context,
            self.total_event_executions()
        );
    }

    /// True when started and not shutting down
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.shutdown_required.load(Ordering::Acquire)
    }

    /// Number of stages of the last successful start (0 before the first)
    ///
    /// Kept across `stop`; a failed `start` leaves it unchanged.
    pub fn stage_count(&self) -> usize {
        self.stats.stage_count()
    }

    /// Accepted events since construction, across restarts
    pub fn total_event_executions(&self) -> u64 {
        self.stats.total_executions()
    }

    /// Look up a running stage
    pub fn stage(&self, id: &str) -> Option<Arc<RuntimeStage>> {
        let registry = self.registry.load();
        let stage = Option::as_ref(&registry)?.get(id).cloned();
        stage
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Configured stage definitions (read-only snapshot)
    pub fn stages(&self) -> Vec<Arc<StageDefinition>> {
        self.stages.read().clone()
    }

    /// Replace the stage definitions; only allowed while not started
    pub fn set_stages(&self, stages: Vec<StageDefinition>) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(Error::Lifecycle(format!(
                "Cannot change stages of running dispatcher [{}]",
                self.context
            )));
        }
        *self.stages.write() = stages.into_iter().map(Arc::new).collect();
        Ok(())
    }

    pub fn is_strict_stage_resolution(&self) -> bool {
        self.strict_stage_resolution.load(Ordering::Acquire)
    }

    /// Intended to be set before `start`; takes effect on the next `execute`
    pub fn set_strict_stage_resolution(&self, strict: bool) {
        self.strict_stage_resolution.store(strict, Ordering::Release);
    }

    pub fn stats(&self) -> &Arc<DispatcherStats> {
        &self.stats
    }

    fn validate(&self, definitions: &[Arc<StageDefinition>]) -> Result<()> {
        let mut seen = HashSet::with_capacity(definitions.len());
        for definition in definitions {
            if definition.handler().is_none() {
                return Err(Error::Config(format!(
                    "EventHandler cannot be empty, invalid configuration for stage [{}@{}]",
                    definition.id(),
                    self.context
                )));
            }
            if !seen.insert(definition.id()) {
                return Err(Error::Config(format!(
                    "Duplicate stage id, invalid configuration for stage [{}@{}]",
                    definition.id(),
                    self.context
                )));
            }
        }
        Ok(())
    }

    fn start_stage(&self, definition: &Arc<StageDefinition>) -> Result<Arc<RuntimeStage>> {
        let id = definition.id();
        let handler = definition.handler().cloned().ok_or_else(|| {
            Error::Config(format!("EventHandler cannot be empty for stage [{}@{}]", id, self.context))
        })?;

        let controller = self.controller_factory.create(definition)?;
        let stage = Arc::new(RuntimeStage::new(
            definition.clone(),
            handler.clone(),
            controller.clone(),
        ));

        self.monitor
            .register(&stage_name(&self.context, id), stage.stage_stats().clone());
        self.monitor
            .register(&routing_name(&self.context, id), stage.routing_stats().clone());

        if let Some(aware) = handler.as_stage_aware() {
            aware.set_stage(definition.clone());
        }
        if let Some(aware) = handler.as_dispatcher_aware() {
            aware.set_dispatcher(self.self_ref.clone());
        }

        controller.set_dispatcher(self.self_ref.clone());
        controller.set_runtime_stage(Arc::downgrade(&stage));
        if let Err(e) = controller.start() {
            self.unregister_stage(id);
            return Err(e);
        }

        debug!(
            "[{}] Stage [{}] started ({} controller)",
            self.context,
            id,
            controller.name()
        );
        Ok(stage)
    }

    /// Stop controllers, then drop their monitoring handles, in registry order
    fn shutdown_stages(&self, registry: &StageRegistry) {
        for stage in registry.iter() {
            info!("Stopping stage-controller for [{}]", stage.id());
            stage.controller().stop();

            let stats = stage.stage_stats();
            debug!(
                "[{}] {} executed, {} failed, slowest {}",
                stage.id(),
                stats.executed(),
                stats.failed(),
                format_micros(stats.max_time_us())
            );
        }
        for stage in registry.iter() {
            self.unregister_stage(stage.id());
        }
    }

    fn unregister_stage(&self, id: &str) {
        self.monitor.unregister(&stage_name(&self.context, id));
        self.monitor.unregister(&routing_name(&self.context, id));
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.started.load(Ordering::Acquire) {
            warn!("Dispatcher [{}] dropped while running, stopping", self.context);
            self.stop();
        }
    }
}

/// Builder for [`Dispatcher`]
///
/// Strict stage resolution is on by default. Without a monitor the
/// statistics objects are not published anywhere.
pub struct DispatcherBuilder {
    context: String,
    stages: Vec<StageDefinition>,
    strict_stage_resolution: bool,
    monitor: Arc<dyn Monitor>,
    controller_factory: Arc<dyn ControllerFactory>,
}

impl DispatcherBuilder {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            stages: Vec::new(),
            strict_stage_resolution: true,
            monitor: Arc::new(NoopMonitor),
            controller_factory: Arc::new(DefaultControllerFactory),
        }
    }

    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = StageDefinition>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn strict_stage_resolution(mut self, strict: bool) -> Self {
        self.strict_stage_resolution = strict;
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn controller_factory(mut self, factory: Arc<dyn ControllerFactory>) -> Self {
        self.controller_factory = factory;
        self
    }

    pub fn build(self) -> Arc<Dispatcher> {
        Arc::new_cyclic(|self_ref| Dispatcher {
            context: self.context,
            stages: RwLock::new(self.stages.into_iter().map(Arc::new).collect()),
            strict_stage_resolution: AtomicBool::new(self.strict_stage_resolution),
            registry: ArcSwapOption::empty(),
            started: AtomicBool::new(false),
            shutdown_required: AtomicBool::new(false),
            stats: Arc::new(DispatcherStats::new()),
            monitor: self.monitor,
            controller_factory: self.controller_factory,
            self_ref: self_ref.clone(),
        })
    }
}
