//! Prometheus-based metrics module
//!
//! Global counters shared by every dispatcher in the process, labelled by
//! context or stage. Exposed via the /metrics endpoint.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// Rejection reason label: dispatcher not running
pub const REJECT_NOT_RUNNING: &str = "not_running";

/// Rejection reason label: unknown stage in lenient mode
pub const REJECT_UNKNOWN_STAGE: &str = "unknown_stage";

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // === Dispatcher Metrics ===

    /// Events accepted per dispatcher context
    pub static ref DISPATCHER_EVENTS_ACCEPTED: IntCounterVec = IntCounterVec::new(
        Opts::new("seda_dispatcher_events_accepted_total", "Events accepted by the dispatcher"),
        &["context"]
    ).unwrap();

    /// Events rejected without error, per context and reason
    pub static ref DISPATCHER_EVENTS_REJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("seda_dispatcher_events_rejected_total", "Events rejected by the dispatcher"),
        &["context", "reason"]
    ).unwrap();

    /// Strict-mode lookups that raised an invalid stage error
    pub static ref DISPATCHER_INVALID_STAGE: IntCounterVec = IntCounterVec::new(
        Opts::new("seda_dispatcher_invalid_stage_total", "Events addressed to undefined stages"),
        &["context"]
    ).unwrap();

    // === Stage Metrics ===

    /// Handler failures per stage
    pub static ref STAGE_HANDLER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("seda_stage_handler_failures_total", "Handler failures per stage"),
        &["stage"]
    ).unwrap();

    /// Handler duration histogram (in seconds)
    pub static ref STAGE_HANDLER_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "seda_stage_handler_duration_seconds",
            "Time spent in the stage handler"
        ).buckets(vec![0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["stage"]
    ).unwrap();
}

/// Initialize and register all metrics with the global registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(DISPATCHER_EVENTS_ACCEPTED.clone())).ok();
    REGISTRY.register(Box::new(DISPATCHER_EVENTS_REJECTED.clone())).ok();
    REGISTRY.register(Box::new(DISPATCHER_INVALID_STAGE.clone())).ok();

    REGISTRY.register(Box::new(STAGE_HANDLER_FAILURES.clone())).ok();
    REGISTRY.register(Box::new(STAGE_HANDLER_DURATION.clone())).ok();
}

/// Format a duration in microseconds to a human readable string
pub fn format_micros(micros: u64) -> String {
    const MS: u64 = 1_000;
    const S: u64 = 1_000_000;

    if micros >= S {
        format!("{:.2} s", micros as f64 / S as f64)
    } else if micros >= MS {
        format!("{:.2} ms", micros as f64 / MS as f64)
    } else {
        format!("{} µs", micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_micros() {
        assert_eq!(format_micros(500), "500 µs");
        assert_eq!(format_micros(1_500), "1.50 ms");
        assert_eq!(format_micros(2_000_000), "2.00 s");
    }

    #[test]
    fn test_init_metrics_is_repeatable() {
        init_metrics();
        init_metrics();
        DISPATCHER_EVENTS_ACCEPTED.with_label_values(&["metrics-test"]).inc();
        let text = prometheus::TextEncoder::new()
            .encode_to_string(&REGISTRY.gather())
            .unwrap();
        assert!(text.contains("seda_dispatcher_events_accepted_total"));
    }
}
