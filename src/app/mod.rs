//! Application Layer
//!
//! This module contains:
//! - Dispatcher: event routing and stage lifecycle
//! - RuntimeStage: a stage bound to its controller and statistics
//! - StageRegistry: immutable snapshot of the running stages
//! - Runtime: configuration-driven dispatcher lifecycle
//! - Monitor: pluggable sink for statistics objects
//! - StatsApi: HTTP API for statistics with Prometheus metrics

mod dispatcher;
pub mod metrics;
pub mod monitor;
mod registry;
mod runtime;
mod runtime_stage;
pub mod stats_api;

pub use dispatcher::{Dispatcher, DispatcherBuilder, UNDEFINED_STAGE_REASON};
pub use monitor::{MemoryMonitor, Monitor, NoopMonitor, Observable, PrometheusMonitor, Sample};
pub use registry::StageRegistry;
pub use runtime::{RunSummary, Runtime};
pub use runtime_stage::{RoutingStats, RuntimeStage, StageStats};
pub use stats_api::DispatcherStats;
