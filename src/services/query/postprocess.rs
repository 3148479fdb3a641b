use serde::Serialize;

use super::params::CounterMode;
use crate::model::DsType;
use crate::units::ConvertedUnit;

/// `(epoch seconds, value)` as returned by the bucketed store query.
pub type RawPoint = (i64, Option<f64>);

/// `[min, max, avg, stddev, p95]` cells of one stats row.
pub type StatsRow = [Option<f64>; 5];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub stddev: Option<f64>,
    pub p95: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesResult {
    pub data: Vec<RawPoint>,
    pub uom: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SeriesStats>,
}

pub struct SeriesContext<'a> {
    pub dstype: &'a DsType,
    pub unit: &'a ConvertedUnit,
    pub counter_mode: CounterMode,
    pub tz_offset: i64,
}

pub fn build_series(ctx: &SeriesContext<'_>, points: Vec<RawPoint>, stats: &[StatsRow]) -> SeriesResult {
    let values = if ctx.dstype.is_counter() {
        derive_counter(&points, ctx.counter_mode)
    } else {
        scale(points, ctx.unit.multiplier)
    };

    let data = values
        .into_iter()
        .map(|(ts, value)| (ts.saturating_add(ctx.tz_offset), value))
        .collect();

    SeriesResult {
        data,
        uom: ctx.unit.label.clone(),
        stats: normalize_stats(stats).map(|s| scale_stats(s, ctx.unit.multiplier)),
    }
}

fn scale(points: Vec<RawPoint>, multiplier: f64) -> Vec<RawPoint> {
    points
        .into_iter()
        .map(|(ts, value)| (ts, value.map(|v| v * multiplier)))
        .collect()
}

/// Turns raw counter readings into per-bucket differences or per-second rates.
///
/// The first reading after the start (or after a null) only seeds state and is
/// emitted as absent. A decrease (counter reset) or a non-advancing timestamp
/// re-emits the last computed value instead of a negative one.
pub fn derive_counter(points: &[RawPoint], mode: CounterMode) -> Vec<RawPoint> {
    let mut previous: Option<(i64, f64)> = None;
    let mut last_computed: Option<f64> = None;
    let mut out = Vec::with_capacity(points.len());

    for &(ts, raw) in points {
        let Some(raw) = raw else {
            previous = None;
            out.push((ts, None));
            continue;
        };

        let computed = match previous {
            None => None,
            Some((prev_ts, prev_raw)) => {
                let delta = raw - prev_raw;
                let elapsed = ts - prev_ts;
                if delta < 0.0 {
                    last_computed
                } else {
                    match mode {
                        CounterMode::Difference => Some(delta),
                        CounterMode::PerSecond if elapsed > 0 => Some(delta / elapsed as f64),
                        CounterMode::PerSecond => last_computed,
                    }
                }
            }
        };

        if previous.is_some() && computed.is_some() {
            last_computed = computed;
        }
        previous = Some((ts, raw));
        out.push((ts, computed));
    }
    out
}

/// Merges stats rows into one record; later non-null cells win per field.
/// Older stores send a single row, newer ones several sparse rows.
pub fn normalize_stats(rows: &[StatsRow]) -> Option<SeriesStats> {
    if rows.is_empty() {
        return None;
    }
    let mut stats = SeriesStats::default();
    for [min, max, avg, stddev, p95] in rows.iter().copied() {
        stats.min = min.or(stats.min);
        stats.max = max.or(stats.max);
        stats.avg = avg.or(stats.avg);
        stats.stddev = stddev.or(stats.stddev);
        stats.p95 = p95.or(stats.p95);
    }
    Some(stats)
}

fn scale_stats(stats: SeriesStats, multiplier: f64) -> SeriesStats {
    let scale = |v: Option<f64>| v.map(|v| v * multiplier);
    SeriesStats {
        min: scale(stats.min),
        max: scale(stats.max),
        avg: scale(stats.avg),
        stddev: scale(stats.stddev),
        p95: scale(stats.p95),
    }
}
