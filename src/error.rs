use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::decoder::DecodeError;
use crate::services::influx::StoreError;
use crate::services::metadata::MetadataError;
use crate::services::query::params::QueryParamError;
use crate::services::query::QueryError;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        tracing::error!(error = %err, "failed to decode ingestion payload");
        Self::bad_request(format!("Failed to decode: {err}"))
    }
}

impl From<BytesRejection> for AppError {
    fn from(rejection: BytesRejection) -> Self {
        tracing::error!(error = %rejection, "failed to read request body");
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryParamError> for AppError {
    fn from(err: QueryParamError) -> Self {
        tracing::error!(error = %err, "rejected query parameters");
        Self::bad_request(format!("Failed to parse query: {err}"))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "time-series store failure");
        Self::internal(err.to_string())
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        tracing::error!(error = %err, "metadata cache failure");
        Self::internal(err.to_string())
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Params(err) => err.into(),
            QueryError::Store(err) => err.into(),
            QueryError::Metadata(err) => err.into(),
            QueryError::MissingMetadata(key) => {
                tracing::error!(selector = %key, "no metadata for selector");
                Self::internal(format!("Failed to lookup metadata for {key}"))
            }
            QueryError::Task(err) => {
                tracing::error!(error = %err, "metadata lookup task failed");
                Self::internal("Internal server error")
            }
        }
    }
}
