//! mcpbridge entry point.
//!
//! Parses arguments, starts the optional health monitor, and runs the bridge
//! over stdin/stdout until end of input or a shutdown signal.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mcpbridge::bridge::Bridge;
use mcpbridge::cli::{BridgeConfig, Cli};
use mcpbridge::error::BridgeError;
use mcpbridge_core::health::{HealthMonitor, HealthMonitorHandle};
use mcpbridge_core::transport::UpstreamClient;

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let debug_env = std::env::var("DEBUG").is_ok_and(|v| v == "1");

    let config = match cli.into_config(debug_env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mcpbridge: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(config.verbose);

    let code = match run(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Bridge stopped with a fatal error");
            eprintln!("mcpbridge: {e}");
            1
        }
    };

    std::process::exit(code);
}

/// Run the bridge until input ends, a signal arrives, or a fatal error.
async fn run(config: BridgeConfig) -> Result<(), BridgeError> {
    let client = UpstreamClient::new(config.upstream)?;

    let monitor: Option<HealthMonitorHandle> = match config.health {
        Some(health) => {
            info!(
                base_url = %health.base_url,
                interval_secs = health.interval.as_secs(),
                "Starting health monitor"
            );
            Some(HealthMonitor::start(health)?)
        }
        None => None,
    };

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let mut bridge = Bridge::new(client);
    let mut stdout = tokio::io::stdout();

    let result = tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            info!("Shutdown signal received, stopping bridge");
            Ok(())
        }
        result = bridge.run(tokio::io::stdin(), &mut stdout) => result.map(|_| ()),
    };

    if let Some(monitor) = monitor {
        monitor.stop().await;
        info!("Health monitor stopped");
    }

    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Signals
// ─────────────────────────────────────────────────────────────────────────────

/// Cancel `shutdown` on SIGINT, or SIGTERM on Unix.
fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C)");
                shutdown_sigint.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
                shutdown.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing Init
// ─────────────────────────────────────────────────────────────────────────────

/// Initialise tracing subscriber with stderr output.
///
/// When `verbose` is true, sets filter to `debug`. Otherwise, respects
/// `RUST_LOG`, defaulting to `warn`. Stdout carries protocol traffic only.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
