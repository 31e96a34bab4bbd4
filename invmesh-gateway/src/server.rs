use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::Gateway;

/// Serve the gateway on `0.0.0.0:<port>` until `shutdown` completes.
///
/// The broker address is resolved before the listener binds, so a broken
/// `.srv` name fails startup instead of the first call.
pub async fn serve<F>(gateway: Arc<Gateway>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let broker = gateway
        .broker()
        .get()
        .await
        .context("failed to resolve the broker address")?
        .to_string();

    let config = gateway.config();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    let port = listener.local_addr()?.port();

    info!(
        "{} gateway started on: {} port. Version: {} ({})",
        config.name, port, config.version, config.env
    );
    info!("Forwarding to broker {}", broker);

    axum::serve(listener, gateway.router())
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server failed")?;

    info!("{} gateway stopped", config.name);
    Ok(())
}

/// Completes on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
