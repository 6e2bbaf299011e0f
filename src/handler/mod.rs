use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cast_bus::CastBus;
use tokio_util::sync::CancellationToken;

pub mod listen;
pub mod playlist;

pub type ApiResult<T> = Result<T, ApiError>;

/// Shared by every handler of one running server.
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<CastBus>,
    /// Port the listener is bound to, written into playlists.
    pub port: u16,
    pub public_host: Option<String>,
    /// Fires when the server starts shutting down.
    pub shutdown: CancellationToken,
}

pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::error!("ApiError: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Stream unavailable because of an internal error",
        )
            .into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
