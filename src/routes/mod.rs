pub mod health;
pub mod metadata;
pub mod queries;
pub mod updates;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Ingestion listener: `POST /` and `GET /healthz`.
pub fn updates_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.config.max_payload_bytes);
    Router::new()
        .merge(health::router())
        .merge(updates::router())
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Read listener: `/query`, `/list` and `GET /healthz`.
pub fn queries_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(queries::router())
        .merge(metadata::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
