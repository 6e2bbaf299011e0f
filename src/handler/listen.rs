use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::Response,
};

use super::{ApiResult, AppState};

pub const ICY_METADATA: &str = "icy-metadata";
pub const ICY_METAINT: &str = "icy-metaint";

/// True when the client asked for interleaved metadata with `icy-metadata: 1`.
pub fn accepts_metadata(headers: &HeaderMap) -> bool {
    headers
        .get(ICY_METADATA)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "1")
}

fn shutting_down() -> ApiResult<Response> {
    Ok(Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(header::CONNECTION, "close")
        .body(Body::from("Server is shutting down"))?)
}

/// The audio stream. Stays open until the client goes away or the server stops.
pub async fn listen(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if state.shutdown.is_cancelled() {
        return shutting_down();
    }
    let stream = state.bus.open_session(accepts_metadata(&headers))?;
    // Shutdown cancels before closing sessions, so a session registered after
    // that sweep sees the token here.
    if state.shutdown.is_cancelled() {
        stream.close();
        return shutting_down();
    }

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CONNECTION, "close");
    if let Some(metaint) = stream.metaint() {
        response = response.header(ICY_METAINT, metaint.to_string());
    }
    Ok(response.body(Body::from_stream(stream))?)
}
