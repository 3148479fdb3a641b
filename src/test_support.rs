use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{BasicCredentials, GatewayConfig, InfluxConfig};
use crate::services::decoder::IngestBatch;
use crate::services::influx::{SeriesData, SeriesQuery, StoreError, TimeSeriesStore};
use crate::services::metadata::SqliteMetadataStore;
use crate::services::query::params::QueryDefaults;
use crate::services::query::retention::RetentionTiers;
use crate::state::AppState;

pub const USER: &str = "agent";
pub const PASSWORD: &str = "secret";

/// In-memory store: records writes and serves canned series per selector key.
#[derive(Default)]
pub struct FakeStore {
    pub writes: Mutex<Vec<IngestBatch>>,
    pub queries: Mutex<Vec<SeriesQuery>>,
    pub series: Mutex<HashMap<String, SeriesData>>,
    pub fail_writes: bool,
    pub fail_queries: bool,
}

impl FakeStore {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            fail_queries: true,
            ..Self::default()
        }
    }

    pub fn with_series(self, key: &str, data: SeriesData) -> Self {
        self.series.lock().unwrap().insert(key.to_string(), data);
        self
    }
}

#[async_trait]
impl TimeSeriesStore for FakeStore {
    async fn write_batches(&self, batches: &[IngestBatch]) -> Result<usize, StoreError> {
        if self.fail_writes {
            return Err(StoreError::Query("write refused".to_string()));
        }
        let points = batches.iter().map(|b| b.samples.len()).sum();
        self.writes.lock().unwrap().extend_from_slice(batches);
        Ok(points)
    }

    async fn query_series(&self, query: &SeriesQuery) -> Result<SeriesData, StoreError> {
        if self.fail_queries {
            return Err(StoreError::Query("database not found".to_string()));
        }
        self.queries.lock().unwrap().push(query.clone());
        let key = format!("{}::{}::{}", query.host, query.service, query.metric);
        Ok(self
            .series
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}

pub fn test_config(data_dir: &Path) -> GatewayConfig {
    GatewayConfig {
        auth: BasicCredentials {
            user: USER.to_string(),
            password: PASSWORD.to_string(),
        },
        data_dir: data_dir.to_path_buf(),
        updates_host: "127.0.0.1".to_string(),
        updates_ports: vec![0],
        expected_results_count: 16,
        max_payload_bytes: 8 * 1024 * 1024,
        metadata_queue_capacity: 4,
        metadata_max_concurrency: 2,
        queries_host: "127.0.0.1".to_string(),
        queries_port: 0,
        query_defaults: QueryDefaults::default(),
        downsampling: RetentionTiers::default(),
        influx: InfluxConfig {
            url: "http://127.0.0.1:8086".to_string(),
            username: None,
            password: None,
            database: "metrics".to_string(),
            retention_policy: "autogen".to_string(),
            timeout: Duration::from_secs(5),
        },
        tz_offset_seconds: Some(3_600),
    }
}

pub fn test_state(
    data_dir: &Path,
    store: Arc<FakeStore>,
) -> (AppState, Arc<SqliteMetadataStore>) {
    let metadata = Arc::new(SqliteMetadataStore::open_in_dir(data_dir).unwrap());
    let state = AppState::new(Arc::new(test_config(data_dir)), metadata.clone(), store);
    (state, metadata)
}

pub fn basic_header(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

pub fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder.header(header::AUTHORIZATION, basic_header(USER, PASSWORD))
}

pub fn get(uri: &str) -> Request<Body> {
    authed(Request::builder().uri(uri)).body(Body::empty()).unwrap()
}

/// Encodes `host -> service -> epoch -> [metrics, dstypes, uoms, values]` the
/// way agents submit it.
pub fn ingest_payload(entries: &[(&str, &str, &str, [&str; 4])]) -> Vec<u8> {
    let mut payload: BTreeMap<String, BTreeMap<String, BTreeMap<String, [String; 4]>>> =
        BTreeMap::new();
    for (host, service, epoch, columns) in entries {
        payload
            .entry(host.to_string())
            .or_default()
            .entry(service.to_string())
            .or_default()
            .insert(epoch.to_string(), (*columns).map(str::to_string));
    }
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&payload, &mut buf).unwrap();
    buf
}

pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
