use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{influxql, line_protocol, SeriesData, SeriesQuery, StoreError, TimeSeriesStore};
use crate::config::InfluxConfig;
use crate::services::decoder::IngestBatch;
use crate::services::query::postprocess::{RawPoint, StatsRow};

/// InfluxDB 1.x HTTP API client (`/write` and `/query`).
#[derive(Clone)]
pub struct InfluxClient {
    base_url: String,
    database: String,
    write_policy: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl InfluxClient {
    pub fn new(config: &InfluxConfig, http: reqwest::Client) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            write_policy: config.retention_policy.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: config.timeout,
            http,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .timeout(self.timeout);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxClient {
    async fn write_batches(&self, batches: &[IngestBatch]) -> Result<usize, StoreError> {
        let encoded = line_protocol::encode_batches(batches);
        if encoded.points == 0 {
            return Ok(0);
        }

        let resp = self
            .request(reqwest::Method::POST, "/write")
            .query(&[
                ("db", self.database.as_str()),
                ("rp", self.write_policy.as_str()),
                ("precision", "s"),
            ])
            .body(encoded.body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }

        tracing::debug!(
            points = encoded.points,
            skipped = encoded.skipped,
            "wrote points"
        );
        Ok(encoded.points)
    }

    async fn query_series(&self, query: &SeriesQuery) -> Result<SeriesData, StoreError> {
        let statements = influxql::series_statements(query, &self.database)?;
        let params = statements.params.to_string();

        let resp = self
            .request(reqwest::Method::GET, "/query")
            .query(&[
                ("db", self.database.as_str()),
                ("epoch", "s"),
                ("q", statements.text.as_str()),
                ("params", params.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }

        let body: QueryResponse = resp.json().await?;
        parse_query_response(body)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Splits the two-statement response into bucketed points and stats rows.
/// A statement without series (no data in range) yields no rows.
fn parse_query_response(body: QueryResponse) -> Result<SeriesData, StoreError> {
    if let Some(error) = body.error {
        return Err(StoreError::Query(error));
    }
    if let Some(error) = body.results.iter().find_map(|r| r.error.clone()) {
        return Err(StoreError::Query(error));
    }

    let mut results = body.results.into_iter();
    let (Some(series), Some(stats)) = (results.next(), results.next()) else {
        return Err(StoreError::Response(
            "expected a result per statement".to_string(),
        ));
    };

    let points = series
        .series
        .iter()
        .flat_map(|s| s.values.iter())
        .map(|row| parse_point(row))
        .collect::<Result<Vec<_>, _>>()?;
    let stats = stats
        .series
        .iter()
        .flat_map(|s| s.values.iter())
        .map(|row| parse_stats_row(row))
        .collect();

    Ok(SeriesData { points, stats })
}

fn parse_point(row: &[Value]) -> Result<RawPoint, StoreError> {
    let ts = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| StoreError::Response(format!("row without epoch timestamp: {row:?}")))?;
    Ok((ts, row.get(1).and_then(Value::as_f64)))
}

fn parse_stats_row(row: &[Value]) -> StatsRow {
    let cell = |idx: usize| row.get(idx).and_then(Value::as_f64);
    [cell(1), cell(2), cell(3), cell(4), cell(5)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<SeriesData, StoreError> {
        parse_query_response(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn parses_points_and_stats() {
        let data = parse(json!({
            "results": [
                {"statement_id": 0, "series": [{
                    "name": "web01",
                    "columns": ["time", "mean"],
                    "values": [[100, 1.5], [400, null], [700, 3]]
                }]},
                {"statement_id": 1, "series": [{
                    "name": "web01",
                    "columns": ["time", "min", "max", "mean", "stddev", "percentile"],
                    "values": [[0, 1, 3, 2.25, 1.06, null]]
                }]}
            ]
        }))
        .unwrap();

        assert_eq!(data.points, vec![(100, Some(1.5)), (400, None), (700, Some(3.0))]);
        assert_eq!(
            data.stats,
            vec![[Some(1.0), Some(3.0), Some(2.25), Some(1.06), None]]
        );
    }

    #[test]
    fn empty_range_yields_no_rows() {
        let data = parse(json!({
            "results": [{"statement_id": 0}, {"statement_id": 1}]
        }))
        .unwrap();
        assert!(data.points.is_empty());
        assert!(data.stats.is_empty());
    }

    #[test]
    fn surfaces_store_errors() {
        assert!(matches!(
            parse(json!({"error": "authorization failed"})),
            Err(StoreError::Query(msg)) if msg == "authorization failed"
        ));
        assert!(matches!(
            parse(json!({"results": [{"statement_id": 0, "error": "database not found: metrics"}]})),
            Err(StoreError::Query(_))
        ));
        assert!(matches!(
            parse(json!({"results": [{"statement_id": 0}]})),
            Err(StoreError::Response(_))
        ));
        assert!(matches!(
            parse(json!({"results": [
                {"statement_id": 0, "series": [{"values": [["not-a-time", 1]]}]},
                {"statement_id": 1}
            ]})),
            Err(StoreError::Response(_))
        ));
    }
}
