use influxdb_line_protocol::LineProtocolBuilder;

use crate::services::decoder::IngestBatch;

const VALUE_FIELD: &str = "value";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EncodedWrite {
    pub body: Vec<u8>,
    pub points: usize,
    pub skipped: usize,
}

/// Encodes decoded batches as line protocol with second precision: one point
/// per sample, measurement = host, tags `service`/`metric`, field `value`.
pub fn encode_batches(batches: &[IngestBatch]) -> EncodedWrite {
    let mut lp = LineProtocolBuilder::new();
    let mut points = 0;
    let mut skipped = 0;

    for batch in batches {
        let epoch = batch.timestamp.timestamp();
        if !is_encodable(&batch.host) || !is_encodable(&batch.service) {
            tracing::warn!(
                host = %batch.host,
                service = %batch.service,
                samples = batch.samples.len(),
                "skipping batch with identifiers line protocol cannot carry"
            );
            skipped += batch.samples.len();
            continue;
        }

        for sample in &batch.samples {
            if !is_encodable(&sample.metric) || !sample.value.is_finite() {
                tracing::warn!(
                    host = %batch.host,
                    service = %batch.service,
                    metric = %sample.metric,
                    "skipping sample line protocol cannot carry"
                );
                skipped += 1;
                continue;
            }
            lp = lp
                .measurement(&batch.host)
                .tag("service", &batch.service)
                .tag("metric", &sample.metric)
                .field(VALUE_FIELD, sample.value)
                .timestamp(epoch)
                .close_line();
            points += 1;
        }
    }

    EncodedWrite {
        body: lp.build(),
        points,
        skipped,
    }
}

fn is_encodable(identifier: &str) -> bool {
    !identifier.is_empty() && !identifier.contains(['\n', '\r'])
}
