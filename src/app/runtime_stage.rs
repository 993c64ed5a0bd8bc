//! Runtime stage - a stage definition bound to its live controller
//!
//! Created by the dispatcher once per stage on every start, dropped on stop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::common::{Event, EventHandler, Result, StageDefinition};
use crate::controller::StageController;

use super::metrics::{STAGE_HANDLER_DURATION, STAGE_HANDLER_FAILURES};
use super::monitor::{Observable, Sample};

/// Handler execution statistics for one stage
#[derive(Debug, Default)]
pub struct StageStats {
    executed: AtomicU64,
    failed: AtomicU64,
    active: AtomicU64,
    total_time_us: AtomicU64,
    max_time_us: AtomicU64,
}

impl StageStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn end(&self, elapsed: Duration, ok: bool) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.executed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_time_us.fetch_add(micros, Ordering::Relaxed);
        self.max_time_us.fetch_max(micros, Ordering::Relaxed);
    }

    /// Handler invocations, successful or not
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Handler invocations currently running
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn total_time_us(&self) -> u64 {
        self.total_time_us.load(Ordering::Relaxed)
    }

    pub fn max_time_us(&self) -> u64 {
        self.max_time_us.load(Ordering::Relaxed)
    }
}

impl Observable for StageStats {
    fn observe(&self) -> Vec<Sample> {
        vec![
            Sample::new("executed", self.executed()),
            Sample::new("failed", self.failed()),
            Sample::new("active", self.active()),
            Sample::new("total_time_us", self.total_time_us()),
            Sample::new("max_time_us", self.max_time_us()),
        ]
    }
}

/// Admission statistics for one stage controller
#[derive(Debug, Default)]
pub struct RoutingStats {
    routed: AtomicU64,
    rejected: AtomicU64,
    pending: AtomicU64,
}

impl RoutingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event accepted by the controller
    pub fn record_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    /// Event refused by the controller
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Event queued, waiting for a worker
    pub fn inc_pending(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Event picked up by a worker
    pub fn dec_pending(&self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }
}

impl Observable for RoutingStats {
    fn observe(&self) -> Vec<Sample> {
        vec![
            Sample::new("routed", self.routed()),
            Sample::new("rejected", self.rejected()),
            Sample::new("pending", self.pending()),
        ]
    }
}

/// Stage definition bound to its controller and statistics
pub struct RuntimeStage {
    definition: Arc<StageDefinition>,
    handler: Arc<dyn EventHandler>,
    controller: Arc<dyn StageController>,
    stage_stats: Arc<StageStats>,
    routing_stats: Arc<RoutingStats>,
}

impl RuntimeStage {
    pub fn new(
        definition: Arc<StageDefinition>,
        handler: Arc<dyn EventHandler>,
        controller: Arc<dyn StageController>,
    ) -> Self {
        Self {
            definition,
            handler,
            controller,
            stage_stats: Arc::new(StageStats::new()),
            routing_stats: Arc::new(RoutingStats::new()),
        }
    }

    pub fn id(&self) -> &str {
        self.definition.id()
    }

    pub fn definition(&self) -> &Arc<StageDefinition> {
        &self.definition
    }

    pub fn controller(&self) -> &Arc<dyn StageController> {
        &self.controller
    }

    pub fn stage_stats(&self) -> &Arc<StageStats> {
        &self.stage_stats
    }

    pub fn routing_stats(&self) -> &Arc<RoutingStats> {
        &self.routing_stats
    }

    /// Run the handler for one event, recording timing and failures
    ///
    /// Controllers call this from whatever thread they execute on.
    pub fn invoke(&self, event: &Event) -> Result<()> {
        let start = Instant::now();
        self.stage_stats.begin();

        let result = self.handler.handle(event);

        let elapsed = start.elapsed();
        self.stage_stats.end(elapsed, result.is_ok());
        STAGE_HANDLER_DURATION
            .with_label_values(&[self.id()])
            .observe(elapsed.as_secs_f64());

        if let Err(e) = &result {
            STAGE_HANDLER_FAILURES.with_label_values(&[self.id()]).inc();
            warn!("[{}] Handler failed: {}", self.id(), e);
        }

        result
    }
}

impl fmt::Debug for RuntimeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeStage")
            .field("id", &self.id())
            .field("controller", &self.controller.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::controller::DirectController;

    struct FailOn(&'static str);

    impl EventHandler for FailOn {
        fn handle(&self, event: &Event) -> Result<()> {
            match event.message().as_text() {
                Some(text) if text == self.0 => Err(Error::handler("boom")),
                _ => Ok(()),
            }
        }
    }

    fn stage() -> RuntimeStage {
        let handler: Arc<dyn EventHandler> = Arc::new(FailOn("bad"));
        let definition = Arc::new(StageDefinition::new("check", handler.clone()));
        RuntimeStage::new(definition, handler, Arc::new(DirectController::new()))
    }

    #[test]
    fn test_invoke_records_stats() {
        let stage = stage();

        stage.invoke(&Event::new("check", "good")).unwrap();
        assert!(stage.invoke(&Event::new("check", "bad")).is_err());

        let stats = stage.stage_stats();
        assert_eq!(stats.executed(), 2);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.active(), 0);
        assert!(stats.max_time_us() <= stats.total_time_us());
    }

    #[test]
    fn test_routing_stats_observe() {
        let stats = RoutingStats::new();
        stats.record_routed();
        stats.record_routed();
        stats.record_rejected();
        stats.inc_pending();

        let samples = stats.observe();
        assert!(samples.contains(&Sample::new("routed", 2)));
        assert!(samples.contains(&Sample::new("rejected", 1)));
        assert!(samples.contains(&Sample::new("pending", 1)));
    }
}
