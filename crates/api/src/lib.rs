//! `api` crate: HTTP and WebSocket surface over the [`engine::Engine`].
//!
//! Everything lives under `/api/v1`:
//!   /workflows/...            definitions, executions, schedules, webhooks
//!   /workflows/ws/{id}        live execution progress
//!   /hooks/{path}             inbound webhook calls
//!   /events/{event_type}      publish onto the event bus

pub mod error;
mod handlers;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use engine::Engine;
use tokio::net::TcpListener;
use tracing::info;

pub use error::ApiError;
pub use routes::build_router;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Bind `bind` and serve until Ctrl-C or SIGTERM.
pub async fn serve(bind: &str, engine: Arc<Engine>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "api listening");

    let app = build_router(AppState { engine });
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
