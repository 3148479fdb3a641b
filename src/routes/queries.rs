use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::auth::BasicAuth;
use crate::error::AppResult;
use crate::services::query::params::RequestParams;
use crate::services::query::{run_query, QueryResponse};
use crate::state::AppState;

pub(crate) async fn query_get(
    _auth: BasicAuth,
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> AppResult<Json<QueryResponse>> {
    let params = RequestParams::from_urlencoded(raw.unwrap_or_default().as_bytes());
    respond(&state, &params).await
}

/// Form fields are read after the query string; both sources are merged.
pub(crate) async fn query_post(
    _auth: BasicAuth,
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> AppResult<Json<QueryResponse>> {
    let mut params = RequestParams::from_urlencoded(raw.unwrap_or_default().as_bytes());
    params.extend_urlencoded(&body);
    respond(&state, &params).await
}

async fn respond(state: &AppState, params: &RequestParams) -> AppResult<Json<QueryResponse>> {
    let response = run_query(state, params, Utc::now().timestamp()).await?;
    Ok(Json(response))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/query", get(query_get).post(query_post))
}

#[cfg(test)]
mod tests {
    use crate::model::{DsType, MetadataEntry};
    use crate::routes::queries_router;
    use crate::services::influx::SeriesData;
    use crate::services::metadata::MetadataStore;
    use crate::test_support::{authed, get, json_body, test_state, FakeStore};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn entry(host: &str, service: &str, metric: &str, dstype: DsType, uom: &str) -> MetadataEntry {
        MetadataEntry {
            host: host.to_string(),
            service: service.to_string(),
            metric: metric.to_string(),
            dstype,
            uom: uom.to_string(),
        }
    }

    fn store() -> FakeStore {
        FakeStore::default()
            .with_series(
                "web01::Disk Usage::used",
                SeriesData {
                    points: vec![(100, Some(1.5)), (400, None)],
                    stats: vec![
                        [Some(1.0), None, None, None, None],
                        [None, Some(2.0), Some(1.5), Some(0.5), Some(1.9)],
                    ],
                },
            )
            .with_series(
                "web01::net::rx",
                SeriesData {
                    points: vec![(0, Some(100.0)), (60, Some(160.0)), (120, Some(40.0))],
                    stats: Vec::new(),
                },
            )
    }

    #[tokio::test]
    async fn returns_processed_series_keyed_by_selector() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store());
        let (state, metadata) = test_state(dir.path(), store.clone());
        metadata
            .upsert(&[
                entry("web01", "Disk Usage", "used", DsType::Gauge, "KB"),
                entry("web01", "net", "rx", DsType::Counter, "B"),
            ])
            .unwrap();
        let app = queries_router(state);

        let response = app
            .oneshot(get(
                "/query?start=0&end=3000&hsm=web01::Disk%20Usage::used&hsm=web01::net::rx&counter_metrics_mode=per_second&data_points=10",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "web01::Disk Usage::used": {
                    "data": [[100, 1500.0], [400, null]],
                    "uom": "bytes",
                    "stats": {"min": 1000.0, "max": 2000.0, "avg": 1500.0, "stddev": 500.0, "p95": 1900.0}
                },
                "web01::net::rx": {
                    "data": [[0, null], [60, 1.0], [120, 1.0]],
                    "uom": "bytes"
                }
            })
        );

        let queries = store.queries.lock().unwrap();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|q| q.interval == "5m" && q.retention_policy == "autogen"));
    }

    #[tokio::test]
    async fn post_merges_query_string_and_form_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store());
        let (state, metadata) = test_state(dir.path(), store.clone());
        metadata
            .upsert(&[entry("web01", "Disk Usage", "used", DsType::Gauge, "")])
            .unwrap();
        let app = queries_router(state);

        let request = authed(
            Request::builder()
                .method("POST")
                .uri("/query?start=0&rp=raw")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded"),
        )
        .body(Body::from(
            "end=600&hsm=web01%3A%3ADisk%2520Usage%3A%3Aused&fixed_time_slot=15&include_offset_timezone=1&fill_option=0",
        ))
        .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["web01::Disk Usage::used"]["data"], json!([[3700, 1.5], [4000, null]]));

        let queries = store.queries.lock().unwrap();
        assert_eq!(queries[0].interval, "15s");
        assert_eq!(queries[0].retention_policy, "raw");
        assert_eq!(queries[0].fill_option.to_string(), "0");
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store());
        let (state, _) = test_state(dir.path(), store.clone());
        let app = queries_router(state);

        for uri in [
            "/query?end=10&hsm=a::b::c",
            "/query?start=0&end=10",
            "/query?start=0&end=10&hsm=a::b::c&fill_option=sideways",
            "/query?start=0&end=10&hsm=a::b::c&data_points=many",
        ] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body = json_body(response).await;
            assert!(body["error"].as_str().unwrap().starts_with("Failed to parse query:"));
        }
        assert!(store.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_selectors_give_an_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path(), Arc::new(store()));
        let app = queries_router(state);

        let response = app
            .oneshot(get("/query?start=0&end=10&hsm=only::two&hsm=a::b%zz::c"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({}));
    }

    #[tokio::test]
    async fn missing_metadata_and_store_failures_are_server_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (state, metadata) = test_state(dir.path(), Arc::new(FakeStore::failing()));
        metadata
            .upsert(&[entry("web01", "net", "rx", DsType::Counter, "B")])
            .unwrap();
        let app = queries_router(state);

        let response = app
            .clone()
            .oneshot(get("/query?start=0&end=10&hsm=web01::net::tx"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = app
            .oneshot(get("/query?start=0&end=10&hsm=web01::net::rx"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(response).await["error"].is_string());
    }
}
