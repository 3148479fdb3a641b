use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::auth::BasicAuth;
use crate::error::{AppError, AppResult};
use crate::services::metadata::MetadataTree;
use crate::state::AppState;

pub(crate) async fn list_metadata(
    _auth: BasicAuth,
    State(state): State<AppState>,
) -> AppResult<Json<MetadataTree>> {
    let metadata = state.metadata.clone();
    let tree = tokio::task::spawn_blocking(move || metadata.list())
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "metadata listing task failed");
            AppError::internal("Internal server error")
        })??;
    Ok(Json(tree))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/list", get(list_metadata))
}
