use axum::{Router, routing::get};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::handler::{AppState, listen::listen, playlist::playlist};

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(playlist))
        .route("/listen.m3u", get(playlist))
        .route("/listen", get(listen))
        .with_state(state)
}

/// Serves on an already bound listener until `cancel` fires.
pub(crate) fn start_api_server(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let port = state.port;
        let app = app_router(state);
        log::info!("API server started on port {}", port);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error running API server: {}", e);
        }
        log::info!("API server on port {} stopped", port);
    })
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}
