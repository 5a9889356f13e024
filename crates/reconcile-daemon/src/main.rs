//! Reconcile Daemon - Background check scheduler
//!
//! Periodically checks due resources against their desired state and
//! promotes artifact versions through delivery config environments.

use clap::Parser;
use reconcile_core::HandlerRegistry;
use reconcile_daemon::{Daemon, DaemonConfig, DaemonResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reconcile Daemon CLI
#[derive(Parser)]
#[command(name = "reconciled")]
#[command(about = "Reconcile Daemon - Background check scheduler", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RECONCILE_CONFIG")]
    config: Option<String>,

    /// Log level, overrides the configured one
    #[arg(long, env = "RECONCILE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "RECONCILE_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let config = DaemonConfig::load(cli.config.as_deref())?;

    // Initialize tracing
    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        resource_interval_ms = config.scheduler.resource_check_interval_ms,
        environment_interval_ms = config.scheduler.environment_check_interval_ms,
        min_age_secs = config.scheduler.min_age_secs,
        "Starting reconciled"
    );

    // Handlers are linked in by embedders; the stock binary ships none
    let daemon = Daemon::new(config, HandlerRegistry::new())?;
    daemon.run().await
}
