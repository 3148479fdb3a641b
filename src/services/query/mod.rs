pub mod bucket;
pub mod params;
pub mod postprocess;
pub mod retention;

use futures::future::try_join_all;
use std::collections::BTreeMap;

use crate::model::Selector;
use crate::services::influx::{SeriesQuery, StoreError};
use crate::services::metadata::MetadataError;
use crate::state::AppState;
use params::{parse_query_params, QueryDescriptor, QueryParamError, RequestParams};
use postprocess::{build_series, SeriesContext, SeriesResult};

/// Response body: decoded `host::service::metric` -> series.
pub type QueryResponse = BTreeMap<String, SeriesResult>;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Params(#[from] QueryParamError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("no metadata for {0}")]
    MissingMetadata(String),
    #[error("metadata lookup task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Validates the request, resolves retention tier and bucket width, then
/// fetches and post-processes every selector concurrently. The first failing
/// selector fails the whole request.
pub async fn run_query(
    state: &AppState,
    params: &RequestParams,
    now_epoch: i64,
) -> Result<QueryResponse, QueryError> {
    let config = &state.config;
    let mut descriptor = parse_query_params(params, &config.query_defaults)?;
    config
        .downsampling
        .apply(&mut descriptor, now_epoch, &config.influx.retention_policy);

    let plan = QueryPlan::new(&descriptor, &config.influx.retention_policy, state.tz_offset());
    tracing::debug!(
        selectors = descriptor.selectors.len(),
        rp = %plan.retention_policy,
        interval = %plan.interval,
        "running query"
    );

    let series = try_join_all(
        descriptor
            .selectors
            .iter()
            .map(|selector| query_selector(state, &descriptor, &plan, selector)),
    )
    .await?;

    Ok(series.into_iter().collect())
}

struct QueryPlan {
    retention_policy: String,
    interval: String,
    tz_offset: i64,
}

impl QueryPlan {
    fn new(descriptor: &QueryDescriptor, default_policy: &str, local_offset: i64) -> Self {
        Self {
            retention_policy: descriptor
                .retention_policy
                .clone()
                .unwrap_or_else(|| default_policy.to_string()),
            interval: bucket::time_slot_size(
                descriptor.data_points,
                descriptor.start_epoch,
                descriptor.end_epoch,
                descriptor.min_time_slot,
                descriptor.fixed_time_slot,
            ),
            tz_offset: if descriptor.include_tz_offset {
                local_offset
            } else {
                0
            },
        }
    }
}

async fn query_selector(
    state: &AppState,
    descriptor: &QueryDescriptor,
    plan: &QueryPlan,
    selector: &Selector,
) -> Result<(String, SeriesResult), QueryError> {
    let key = selector.key();

    let metadata = state.metadata.clone();
    let lookup_key = selector.clone();
    let setup = tokio::task::spawn_blocking(move || {
        metadata.lookup(&lookup_key.host, &lookup_key.service, &lookup_key.metric)
    })
    .await??
    .ok_or_else(|| QueryError::MissingMetadata(key.clone()))?;

    let data = state
        .store
        .query_series(&SeriesQuery {
            retention_policy: plan.retention_policy.clone(),
            host: selector.host.clone(),
            service: selector.service.clone(),
            metric: selector.metric.clone(),
            start_epoch: descriptor.start_epoch,
            end_epoch: descriptor.end_epoch,
            interval: plan.interval.clone(),
            fill_option: descriptor.fill_option.clone(),
        })
        .await?;

    let unit = state.units.convert(&setup.uom);
    let ctx = SeriesContext {
        dstype: &setup.dstype,
        unit: &unit,
        counter_mode: descriptor.counter_metrics_mode,
        tz_offset: plan.tz_offset,
    };
    Ok((key, build_series(&ctx, data.points, &data.stats)))
}
