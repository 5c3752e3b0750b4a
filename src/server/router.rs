//! HTTP Router
//!
//! Assembles the axum application: open liveness probe, API-key-guarded
//! `/api` routes, CORS and request tracing.

use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth;
use super::handlers;
use super::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/devices", get(handlers::list_devices))
        .route("/devices/:id", get(handlers::get_device))
        .route("/devices/:id/set", post(handlers::set_device))
        .route("/events", get(handlers::query_events))
        .route("/bridge/health", get(handlers::bridge_health))
        .route("/bridge/info", get(handlers::bridge_info))
        .route("/bridge/permit_join", post(handlers::permit_join))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::service_health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.api().cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
