//! polygate gateway daemon
//!
//! Usage:
//!   # Defaults, listening on 0.0.0.0:50051
//!   polygated
//!
//!   # With a configuration file, reloaded every 30 seconds
//!   polygated --config /etc/polygate/gateway.yaml
//!
//!   # JSON logs, no reload
//!   polygated --config gateway.yaml --json-logs --reload-interval-secs 0

use clap::Parser;
use polygated::{Cli, ConfigHandle, GatewayConfig, GatewayDaemon};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = match &cli.config {
        Some(path) => {
            let mut config = GatewayConfig::from_file(path)?;
            cli.apply(&mut config);
            ConfigHandle::watching(config, path.clone())
        }
        None => {
            let mut config = GatewayConfig::default();
            cli.apply(&mut config);
            ConfigHandle::new(config)
        }
    };

    let shutdown = CancellationToken::new();
    let reload = cli
        .reload_interval()
        .filter(|_| cli.config.is_some())
        .map(|interval| config.spawn_reload(interval, shutdown.clone()));

    let daemon = GatewayDaemon::new(config);
    let signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received, initiating graceful shutdown...");
        signal.cancel();
    });

    let result = daemon.serve(shutdown.clone()).await;
    shutdown.cancel();
    if let Some(handle) = reload {
        let _ = handle.await;
    }

    match &result {
        Ok(()) => tracing::info!("Gateway shut down gracefully"),
        Err(e) => tracing::error!("Gateway stopped with error: {}", e),
    }
    result
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
