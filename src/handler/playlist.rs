use axum::{extract::State, http::header, response::IntoResponse};

use super::AppState;
use crate::net;

/// M3U playlist pointing at the stream: a single `http://<host>:<port>/listen` line.
pub async fn playlist(State(state): State<AppState>) -> impl IntoResponse {
    let host = state
        .public_host
        .clone()
        .unwrap_or_else(|| net::url_host(net::local_address()));
    (
        [(header::CONTENT_TYPE, "audio/x-mpegurl")],
        format!("http://{}:{}/listen", host, state.port),
    )
}
