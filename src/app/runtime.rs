//! Runtime - configuration-driven dispatcher lifecycle
//!
//! The runtime is responsible for:
//! - Building the dispatcher and its stages from configuration
//! - Starting the stats server
//! - Feeding events read from an input stream
//! - Stopping everything on end of input or Ctrl+C

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::common::{Error, Event, Result};
use crate::config::Config;
use crate::handlers::HandlerRegistry;

use super::dispatcher::Dispatcher;
use super::monitor::MemoryMonitor;
use super::stats_api::start_api_server;

/// Outcome counts of one `Runtime::run`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Runtime manages the dispatcher lifecycle
pub struct Runtime {
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<MemoryMonitor>,
    api_listen: Option<SocketAddr>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Runtime {
    /// Build runtime from configuration
    ///
    /// Statistics objects are registered into `monitor`.
    pub fn from_config(
        config: &Config,
        handlers: &HandlerRegistry,
        monitor: Arc<MemoryMonitor>,
    ) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);

        let api_listen = config
            .api
            .as_ref()
            .map(|api| {
                api.listen.parse::<SocketAddr>().map_err(|e| {
                    Error::Config(format!("Invalid API listen address {}: {}", api.listen, e))
                })
            })
            .transpose()?;

        let dispatcher = Dispatcher::builder(&config.dispatcher.context)
            .stages(config.dispatcher.stage_definitions(handlers))
            .strict_stage_resolution(config.dispatcher.strict_stage_resolution)
            .monitor(monitor.clone())
            .build();

        Ok(Self {
            dispatcher,
            monitor,
            api_listen,
            shutdown_tx,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run until `input` is exhausted or Ctrl+C
    ///
    /// Each input line is `<stage> <payload>`; blank lines and lines starting
    /// with `#` are skipped.
    pub async fn run<R>(&self, input: R) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        self.dispatcher.start()?;

        let api_handle = self.api_listen.map(|addr| {
            let monitor = self.monitor.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                start_api_server(addr, monitor, shutdown_rx).await;
            })
        });

        info!(
            "Runtime started: dispatcher [{}] with {} stages",
            self.dispatcher.context(),
            self.dispatcher.stage_count()
        );

        let result = self.feed(input).await;

        info!("Shutting down...");
        // Pool controllers join their worker threads on stop
        let dispatcher = self.dispatcher.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || dispatcher.stop()).await {
            error!("Dispatcher stop task failed: {}", e);
        }

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = api_handle {
            let _ = handle.await;
        }

        let summary = result?;
        info!(
            "Processed input: {} accepted, {} rejected, {} failed",
            summary.accepted, summary.rejected, summary.failed
        );
        Ok(summary)
    }

    async fn feed<R>(&self, input: R) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = RunSummary::default();
        let mut lines = input.lines();

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("End of input");
                        break;
                    };
                    let Some(event) = parse_line(&line) else {
                        continue;
                    };
                    self.submit(event, &mut summary);
                }
                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C");
                    break;
                }
            }
        }

        Ok(summary)
    }

    fn submit(&self, event: Event, summary: &mut RunSummary) {
        let stage = event.stage.clone();
        match self.dispatcher.execute(event) {
            Ok(true) => summary.accepted += 1,
            Ok(false) => {
                warn!("[{}] Event rejected", stage);
                summary.rejected += 1;
            }
            Err(e) => {
                error!("[{}] Event failed: {}", stage, e);
                summary.failed += 1;
            }
        }
    }
}

/// Parse `<stage> <payload>` into an event
fn parse_line(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (stage, payload) = match line.split_once(char::is_whitespace) {
        Some((stage, payload)) => (stage, payload.trim_start()),
        None => (line, ""),
    };
    Some(Event::new(stage, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ControllerKind;

    #[test]
    fn test_parse_line() {
        let event = parse_line("print hello world").unwrap();
        assert_eq!(event.stage(), "print");
        assert_eq!(event.message().as_text(), Some("hello world"));

        let event = parse_line("  only-stage ").unwrap();
        assert_eq!(event.stage(), "only-stage");
        assert_eq!(event.message().as_text(), Some(""));

        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("# comment").is_none());
    }

    #[tokio::test]
    async fn test_run_feeds_input() {
        let mut config = Config::default_demo();
        // inline forwarding keeps the counts deterministic
        config.dispatcher.stages[0].controller = ControllerKind::Direct;
        let monitor = Arc::new(MemoryMonitor::new());
        let runtime =
            Runtime::from_config(&config, &HandlerRegistry::with_builtins(), monitor.clone())
                .unwrap();

        let input: &[u8] = b"print one\n# skipped\nentry two\nnowhere three\n";
        let summary = runtime.run(input).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                accepted: 2,
                rejected: 0,
                failed: 1,
            }
        );
        assert!(!runtime.dispatcher().is_running());
        // entry forwards to print: 2 direct submissions + 1 forwarded
        assert_eq!(runtime.dispatcher().total_event_executions(), 3);
        assert!(monitor.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_pooled_stages() {
        // demo config: pooled entry stage feeding an inline print stage
        let config = Config::default_demo();
        let runtime = Runtime::from_config(
            &config,
            &HandlerRegistry::with_builtins(),
            Arc::new(MemoryMonitor::new()),
        )
        .unwrap();

        let input: &[u8] = b"entry one\nentry two\nprint three\n";
        let summary = runtime.run(input).await.unwrap();

        assert_eq!(summary.accepted, 3);
        assert!(!runtime.dispatcher().is_running());
        assert!(runtime.dispatcher().total_event_executions() >= 3);
        assert_eq!(runtime.dispatcher().stage_count(), 2);
    }

    #[tokio::test]
    async fn test_run_fails_on_unknown_handler() {
        let mut config = Config::default_demo();
        config.dispatcher.stages[1].handler = "missing".to_string();
        let runtime = Runtime::from_config(
            &config,
            &HandlerRegistry::with_builtins(),
            Arc::new(MemoryMonitor::new()),
        )
        .unwrap();

        let input: &[u8] = b"print one\n";
        assert!(matches!(runtime.run(input).await, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_api_listen() {
        let mut config = Config::default_demo();
        config.api = Some(crate::config::ApiConfig {
            listen: "not an address".to_string(),
        });
        let result = Runtime::from_config(
            &config,
            &HandlerRegistry::with_builtins(),
            Arc::new(MemoryMonitor::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
