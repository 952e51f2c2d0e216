//! Tenant SQL Guard entry point.
//!
//! Reads one JSON request per line from stdin and writes one JSON response
//! per line to stdout. Stops on EOF or Ctrl-C.

use anyhow::Result;
use tenant_sql_guard::transport::serve;
use tenant_sql_guard::{Config, MssqlDriver, QueryCoordinator};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr (stdout is reserved for responses)
    init_logging();

    let version = env!("CARGO_PKG_VERSION");
    eprintln!("Tenant SQL Guard v{version} starting...");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: {}:{} (validation mode: {:?})",
        config.database.host, config.database.port, config.security.validation_mode
    );

    let driver = MssqlDriver::from_config(&config);
    if let Err(e) = driver.ping().await {
        // Not fatal; the driver reconnects on the next dispatch.
        warn!("Initial connection check failed: {}", e);
    }

    let coordinator = QueryCoordinator::from_config(&config, driver);
    eprintln!("Ready to accept requests on stdin");

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = serve(&coordinator, stdin, stdout) => {
            result?;
            eprintln!("Input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Shutdown signal received");
        }
    }

    let metrics = coordinator.metrics().snapshot();
    info!(
        "Shutting down: {} queries, {} succeeded, {} rejected, {} failed",
        metrics.queries_total,
        metrics.queries_success,
        metrics.queries_rejected,
        metrics.queries_failed
    );

    Ok(())
}

/// Initialize tracing subscriber with stderr output.
///
/// Logs MUST go to stderr because stdout carries the response stream.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,tenant_sql_guard=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
