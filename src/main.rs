//! seda - run a staged event dispatcher fed from stdin

use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use seda_core::app::metrics::{init_metrics, REGISTRY};
use seda_core::app::{PrometheusMonitor, Runtime};
use seda_core::config::Config;
use seda_core::error::{Error, Result};
use seda_core::handlers::HandlerRegistry;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "seda")]
#[command(about = "Staged event dispatcher: reads `<stage> <payload>` lines from stdin")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stats API listen address (e.g., 127.0.0.1:9090)
    #[arg(long, value_name = "ADDR")]
    api: Option<String>,

    /// Print an example configuration and exit
    #[arg(long)]
    gen_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.gen_config {
        let json = serde_json::to_string_pretty(&Config::default_demo())
            .map_err(|e| Error::Config(format!("Failed to render config: {}", e)))?;
        println!("{}", json);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default_demo(),
    };

    // Override API listen from command line
    if let Some(listen) = args.api {
        config.api = Some(seda_core::config::ApiConfig { listen });
    }

    // Initialize logging: RUST_LOG wins over the config file
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| config.log.level.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    if args.config.is_none() {
        info!("No config file specified, using demo config");
    }
    info!("seda v{} starting...", env!("CARGO_PKG_VERSION"));

    init_metrics();
    let monitor = PrometheusMonitor::new(&REGISTRY)
        .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let runtime =
            Runtime::from_config(&config, &HandlerRegistry::with_builtins(), monitor.memory().clone())?;
        runtime.run(BufReader::new(tokio::io::stdin())).await
    })?;

    info!("Goodbye!");
    Ok(())
}
