use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::auth::BasicAuth;
use crate::services::metadata_updater::UpdaterStatsSnapshot;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_updater: Option<UpdaterStatsSnapshot>,
}

pub(crate) async fn healthz_handler(
    _auth: BasicAuth,
    State(state): State<AppState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        metadata_updater: state
            .metadata_queue
            .as_ref()
            .map(|queue| queue.stats().snapshot()),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz_handler))
}
