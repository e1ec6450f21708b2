use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clubgate::config::{ClubgateConfig, LoggingConfig};
use clubgate::ratelimit::SystemClock;
use clubgate::web::{public_router, AdmissionServer, AdmissionStack};

/// Admission-controlled API server.
#[derive(Debug, Parser)]
#[command(name = "clubgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ClubgateConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.addr {
        config.server.addr = addr;
    }

    init_tracing(&config.logging);

    info!("Starting Clubgate admission control");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(addr = %config.server.addr, "Configuration loaded");

    let stack = AdmissionStack::from_config(&config, Arc::new(SystemClock::new()))?;
    let sweeper = stack
        .store
        .spawn_sweeper(Duration::from_secs(config.admission.sweep_interval_secs));
    info!(
        interval_secs = config.admission.sweep_interval_secs,
        "Counter sweeper started"
    );

    let router = stack.protect(public_router(&stack.routes));
    AdmissionServer::new(config.server.addr, router)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Clubgate admission control stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
