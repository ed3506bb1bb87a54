// ABOUTME: HTTP server bootstrap binding the router to a TCP listener
// ABOUTME: Serves until SIGINT or SIGTERM, letting in-flight turns finish
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::constants::chat::SHUTDOWN_DRAIN_SECS;

use crate::errors::{AppError, AppResult};
use crate::resources::ServerResources;
use crate::routes::AppRoutes;

/// Bind `0.0.0.0:{http_port}` and serve until shutdown
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails
pub async fn run(resources: Arc<ServerResources>) -> AppResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, resources.config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::config(format!("Failed to bind {addr}: {e}")))?;
    serve(listener, resources).await
}

/// Serve on an already-bound listener until SIGINT or SIGTERM
///
/// # Errors
///
/// Returns an error if the server fails
pub async fn serve(listener: TcpListener, resources: Arc<ServerResources>) -> AppResult<()> {
    serve_until(listener, resources, shutdown_signal()).await
}

/// Serve until `shutdown` resolves, then wait for running turns to finalize
///
/// # Errors
///
/// Returns an error if the listener has no address or the server fails
pub async fn serve_until<F>(
    listener: TcpListener,
    resources: Arc<ServerResources>,
    shutdown: F,
) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener
        .local_addr()
        .map_err(|e| AppError::internal(format!("Listener has no address: {e}")))?;
    info!("HTTP server listening on http://{local_addr}");

    let orchestrator = resources.orchestrator.clone();
    axum::serve(listener, AppRoutes::router(resources))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::internal(format!("HTTP server error: {e}")))?;

    let in_flight = orchestrator.turns_in_flight();
    if in_flight > 0 {
        info!(in_flight, "Waiting for running chat turns to finalize");
    }
    if timeout(Duration::from_secs(SHUTDOWN_DRAIN_SECS), orchestrator.drain())
        .await
        .is_err()
    {
        warn!(
            in_flight = orchestrator.turns_in_flight(),
            "Chat turns still running at shutdown deadline"
        );
    }

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
