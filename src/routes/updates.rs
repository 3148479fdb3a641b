use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use crate::auth::BasicAuth;
use crate::error::AppResult;
use crate::services::decoder::{decode_payload, IngestBatch};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub status: i32,
}

/// Decodes an agent submission, writes its samples to the store and, once
/// the write succeeded, queues the metadata rows for the cache.
pub(crate) async fn ingest(
    _auth: BasicAuth,
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<Json<IngestResponse>> {
    let body = body?;
    let batches = decode_payload(&body, state.config.expected_results_count)?;
    if batches.is_empty() {
        return Ok(Json(IngestResponse { status: 0 }));
    }

    let points = state.store.write_batches(&batches).await?;
    tracing::debug!(batches = batches.len(), points, "ingested payload");

    if let Some(queue) = &state.metadata_queue {
        queue
            .enqueue(batches.iter().flat_map(IngestBatch::metadata_entries).collect())
            .await;
    }

    Ok(Json(IngestResponse { status: 0 }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(ingest))
}
