use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use prism_ctl::{CtlConfig, CtlManager, CtlServer, LocalEngine};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

/// Run the adapter until Ctrl-C, SIGTERM or a shutdown request
pub async fn run_serve(config: CtlConfig) -> Result<()> {
    if let Some(metrics_addr) = config.metrics_addr()? {
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics endpoint listening on http://{}/metrics", metrics_addr);
    }

    let node_info = config.node_info();
    let members = config.initial_members();
    info!(
        "Starting prism-ctl node {} on {} (members: {:?})",
        node_info.node_id, config.rpc.bind_addr, members
    );

    let engine = Arc::new(LocalEngine::new(config.engine.clone(), members));
    let manager = Arc::new(CtlManager::new(node_info, engine));
    let server = CtlServer::new(config.rpc.clone(), manager);

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    server.serve().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
