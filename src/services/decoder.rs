use chrono::{DateTime, TimeZone, Utc};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::escape::query_unescape;
use crate::model::{DsType, MetadataEntry};

/// `host -> service -> epoch -> [metrics, dstypes, uoms, values]`, each leaf
/// field a colon-joined column.
type WirePayload = BTreeMap<String, BTreeMap<String, BTreeMap<String, [String; 4]>>>;

const COLUMN_SEPARATOR: char = ':';
const SAMPLES_PER_BATCH_HINT: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("payload decoder aborted: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: String,
    pub dstype: DsType,
    pub uom: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestBatch {
    pub host: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<Sample>,
}

impl IngestBatch {
    pub fn metadata_entries(&self) -> impl Iterator<Item = MetadataEntry> + '_ {
        self.samples.iter().map(move |sample| MetadataEntry {
            host: self.host.clone(),
            service: self.service.clone(),
            metric: sample.metric.clone(),
            dstype: sample.dstype.clone(),
            uom: sample.uom.clone(),
        })
    }
}

/// Decodes one ingestion request body.
///
/// Structural corruption fails the whole payload; a bad timestamp or host/service
/// escape skips that entry; a bad value or metric escape skips that one sample.
pub fn decode_payload(
    raw: &[u8],
    expected_results: usize,
) -> Result<Vec<IngestBatch>, DecodeError> {
    let payload = decode_structure(raw)?;

    let mut batches = Vec::with_capacity(expected_results);
    for (host_escaped, services) in payload {
        let Ok(host) = query_unescape(&host_escaped) else {
            tracing::debug!(host = %host_escaped, "skipping entry with invalid host escape");
            continue;
        };
        for (service_escaped, entries) in services {
            let Ok(service) = query_unescape(&service_escaped) else {
                tracing::debug!(service = %service_escaped, "skipping entry with invalid service escape");
                continue;
            };
            for (epoch_raw, columns) in entries {
                let Some(timestamp) = parse_epoch(&epoch_raw) else {
                    tracing::debug!(timestamp = %epoch_raw, "skipping entry with invalid timestamp");
                    continue;
                };
                batches.push(IngestBatch {
                    host: host.clone(),
                    service: service.clone(),
                    timestamp,
                    samples: decode_columns(&columns),
                });
            }
        }
    }

    Ok(batches)
}

fn decode_structure(raw: &[u8]) -> Result<WirePayload, DecodeError> {
    guarded(|| ciborium::de::from_reader::<WirePayload, _>(raw))
}

/// Runs a decoder, turning both its error and any panic into a `DecodeError`.
fn guarded<T, E: fmt::Display>(decode: impl FnOnce() -> Result<T, E>) -> Result<T, DecodeError> {
    match panic::catch_unwind(AssertUnwindSafe(decode)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(DecodeError::Malformed(err.to_string())),
        Err(panic) => Err(DecodeError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    let epoch = raw.parse::<i64>().ok()?;
    Utc.timestamp_opt(epoch, 0).single()
}

fn decode_columns(columns: &[String; 4]) -> Vec<Sample> {
    let [metrics, dstypes, uoms, values] = columns;
    let dstypes: Vec<&str> = dstypes.split(COLUMN_SEPARATOR).collect();
    let uoms: Vec<&str> = uoms.split(COLUMN_SEPARATOR).collect();
    let values: Vec<&str> = values.split(COLUMN_SEPARATOR).collect();

    let mut samples = Vec::with_capacity(SAMPLES_PER_BATCH_HINT);
    for (idx, metric_escaped) in metrics.split(COLUMN_SEPARATOR).enumerate() {
        let (Some(dstype), Some(uom), Some(value)) =
            (dstypes.get(idx), uoms.get(idx), values.get(idx))
        else {
            tracing::debug!(metric = %metric_escaped, "skipping metric without matching columns");
            continue;
        };
        let Ok(value) = value.parse::<f64>() else {
            tracing::debug!(metric = %metric_escaped, value = %value, "skipping unparsable value");
            continue;
        };
        let Ok(metric) = query_unescape(metric_escaped) else {
            tracing::debug!(metric = %metric_escaped, "skipping metric with invalid escape");
            continue;
        };
        samples.push(Sample {
            metric,
            dstype: DsType::parse(dstype),
            uom: (*uom).to_string(),
            value,
        });
    }
    samples
}
