//! HTTP server
//!
//! The REST surface over the correlation core: router, handlers, API-key
//! middleware and the DTOs they exchange.

pub mod auth;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;

pub use router::create_router;
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::types::Error;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = Json(json!({
            "error": self.error_code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
