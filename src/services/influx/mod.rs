pub mod client;
pub mod influxql;
pub mod line_protocol;

use async_trait::async_trait;

use crate::services::decoder::IngestBatch;
use crate::services::query::params::FillOption;
use crate::services::query::postprocess::{RawPoint, StatsRow};

pub use client::InfluxClient;

/// One selector's read against a resolved retention policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    pub retention_policy: String,
    pub host: String,
    pub service: String,
    pub metric: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
    /// Bucket width literal, e.g. `30s` or `5m`.
    pub interval: String,
    pub fill_option: FillOption,
}

/// Raw rows for one selector: bucketed means plus the stats rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesData {
    pub points: Vec<RawPoint>,
    pub stats: Vec<StatsRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("time-series store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("time-series store returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("time-series store query error: {0}")]
    Query(String),
    #[error("unexpected time-series store response: {0}")]
    Response(String),
    #[error("refusing to query with unsafe identifier {0:?}")]
    UnsafeIdentifier(String),
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Writes every sample of the batches; returns the number of points sent.
    async fn write_batches(&self, batches: &[IngestBatch]) -> Result<usize, StoreError>;

    async fn query_series(&self, query: &SeriesQuery) -> Result<SeriesData, StoreError>;
}
