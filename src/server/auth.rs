//! API-key middleware
//!
//! Every `/api` route requires an `X-API-Key` header matching one of the
//! configured keys. An empty key list disables the check entirely (main
//! warns about it at startup); `/health` is mounted outside this layer.

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let keys = &state.api().api_keys;
    if keys.is_empty() {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if keys.iter().any(|k| k == key) => next.run(request).await,
        Some(_) => unauthorized("invalid API key"),
        None => unauthorized("missing API key; provide an X-API-Key header"),
    }
}

fn unauthorized(message: &str) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "unauthorized",
            "message": message,
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("ApiKey"));
    response
}
