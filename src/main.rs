//! Snapshotter operator
//!
//! Main entry point. Registers the snapshot CRDs, waits for them to be served
//! and runs the snapshot controller until SIGTERM or SIGINT.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use snapshotter_operator::{
    cluster::{AmbientConfig, KubeClientFactory},
    config::OperatorConfig,
    controllers::KubeControllerFactory,
    drivers, metrics, Snapshotter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting snapshotter operator");

    let config = OperatorConfig::from_env()?;
    let driver = drivers::by_name(&config.driver)?;
    let source = if config.in_cluster {
        AmbientConfig::InCluster
    } else {
        AmbientConfig::Inferred
    };

    let snapshotter = Arc::new(Snapshotter::new(
        driver,
        source,
        KubeClientFactory,
        KubeControllerFactory,
        config.timings,
    ));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port, snapshotter.subscribe()));
    info!("Metrics server starting on port {}", config.metrics_port);

    let stop = CancellationToken::new();
    let mut bootstrap = {
        let snapshotter = snapshotter.clone();
        let stop = stop.clone();
        tokio::spawn(async move { snapshotter.start(stop).await })
    };

    // Handle graceful shutdown
    let result = tokio::select! {
        res = &mut bootstrap => res,
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
            stop.cancel();
            bootstrap.await
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
            stop.cancel();
            bootstrap.await
        }
    };

    info!("Snapshotter operator stopped");
    Ok(result??)
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,snapshotter_operator=debug,kube=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install CTRL+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
