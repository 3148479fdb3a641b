const MINUTE: f64 = 60.0;
const HOUR: f64 = 3600.0;
const DAY: f64 = 24.0 * HOUR;
const WEEK: f64 = 7.0 * DAY;

/// Computes the `GROUP BY time(..)` interval literal for a query.
///
/// A fixed slot wins outright and is always rendered in seconds. Otherwise the
/// span is split into `data_points` buckets, raised to `min_slot` and to one
/// second. Seconds are truncated; minutes and coarser units are rounded up.
pub fn time_slot_size(
    data_points: i64,
    start_epoch: i64,
    end_epoch: i64,
    min_slot: i64,
    fixed_slot: i64,
) -> String {
    if fixed_slot > 0 {
        return format!("{fixed_slot}s");
    }

    // Any pair of i64 epochs is accepted upstream.
    let span = (i128::from(end_epoch) - i128::from(start_epoch)) as f64;
    let mut slot = span / data_points.max(1) as f64;
    if slot < min_slot as f64 {
        slot = min_slot as f64;
    }
    if slot < 1.0 {
        slot = 1.0;
    }

    if slot < MINUTE {
        format!("{}s", slot.trunc() as i64)
    } else if slot < HOUR {
        format!("{}m", (slot / MINUTE).ceil() as i64)
    } else if slot < DAY {
        format!("{}h", (slot / HOUR).ceil() as i64)
    } else if slot < WEEK {
        format!("{}d", (slot / DAY).ceil() as i64)
    } else {
        format!("{}w", (slot / WEEK).ceil() as i64)
    }
}
