//! Statistics: dispatcher aggregate counters and the HTTP endpoint
//!
//! Endpoints:
//! - `GET /metrics`   Prometheus text format
//! - `GET /api/stats` JSON dump of every registered statistics object

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::metrics::REGISTRY;
use super::monitor::{MemoryMonitor, Observable, Sample};

/// Dispatcher-level statistics
#[derive(Debug, Default)]
pub struct DispatcherStats {
    executions: AtomicU64,
    stage_count: AtomicUsize,
    running: AtomicBool,
}

impl DispatcherStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one accepted event. Monotonic, never reset.
    pub fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub(crate) fn set_stage_count(&self, count: usize) {
        self.stage_count.store(count, Ordering::Relaxed);
    }

    pub fn stage_count(&self) -> usize {
        self.stage_count.load(Ordering::Relaxed)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Observable for DispatcherStats {
    fn observe(&self) -> Vec<Sample> {
        vec![
            Sample::new("stage_count", self.stage_count() as u64),
            Sample::new("total_event_executions", self.total_executions()),
            Sample::new("running", u64::from(self.running())),
        ]
    }
}

/// Prometheus metrics endpoint
async fn get_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Registered statistics objects as JSON
async fn get_stats(
    State(monitor): State<Arc<MemoryMonitor>>,
) -> Json<BTreeMap<String, BTreeMap<&'static str, u64>>> {
    Json(monitor.snapshot())
}

/// Build the API router
pub fn build_api_router(monitor: Arc<MemoryMonitor>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/api/stats", get(get_stats))
        .with_state(monitor)
}

/// Start the stats server
pub async fn start_api_server(
    addr: SocketAddr,
    monitor: Arc<MemoryMonitor>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let app = build_api_router(monitor);

    info!("Stats server listening on http://{}/metrics", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind stats server to {}: {}", addr, e);
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Stats server shutting down");
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Stats server error: {}", e);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::monitor::Monitor;

    #[test]
    fn test_dispatcher_stats_observe() {
        let stats = DispatcherStats::new();
        stats.record_execution();
        stats.record_execution();
        stats.set_stage_count(3);
        stats.set_running(true);

        let samples = stats.observe();
        assert!(samples.contains(&Sample::new("total_event_executions", 2)));
        assert!(samples.contains(&Sample::new("stage_count", 3)));
        assert!(samples.contains(&Sample::new("running", 1)));
    }

    #[tokio::test]
    async fn test_get_stats_returns_snapshot() {
        let monitor = Arc::new(MemoryMonitor::new());
        let stats = Arc::new(DispatcherStats::new());
        stats.record_execution();
        monitor.register("seda.dispatcher:api", stats);

        let Json(body) = get_stats(State(monitor)).await;
        assert_eq!(body["seda.dispatcher:api"]["total_event_executions"], 1);
    }

    #[tokio::test]
    async fn test_get_metrics_ok() {
        super::super::metrics::init_metrics();
        let response = get_metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
