use std::time::Duration;

use super::params::{FillOption, QueryDescriptor};

/// A downsampling tier: queries starting within `min_age` of now read from
/// retention policy `name`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionTier {
    pub name: String,
    pub min_age: Duration,
    pub grouping_interval: Option<Duration>,
    pub fill_option: Option<FillOption>,
}

/// Tiers kept in ascending `min_age` order; equal ages keep configuration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionTiers {
    tiers: Vec<RetentionTier>,
}

impl RetentionTiers {
    pub fn new(mut tiers: Vec<RetentionTier>) -> Self {
        tiers.sort_by_key(|tier| tier.min_age);
        Self { tiers }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetentionTier> {
        self.tiers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// First tier whose window `[now - min_age, now]` covers `start_epoch`.
    pub fn select(&self, start_epoch: i64, now_epoch: i64) -> Option<&RetentionTier> {
        self.tiers.iter().find(|tier| {
            let age = i64::try_from(tier.min_age.as_secs()).unwrap_or(i64::MAX);
            start_epoch >= now_epoch.saturating_sub(age)
        })
    }

    /// Resolves the retention policy for a query the caller did not pin,
    /// applying the tier's grouping floor and fill override.
    pub fn apply(&self, descriptor: &mut QueryDescriptor, now_epoch: i64, default_policy: &str) {
        if descriptor.retention_policy.is_some() {
            return;
        }

        let Some(tier) = self.select(descriptor.start_epoch, now_epoch) else {
            descriptor.retention_policy = Some(default_policy.to_string());
            return;
        };

        tracing::debug!(tier = %tier.name, start = descriptor.start_epoch, "selected retention tier");
        descriptor.retention_policy = Some(tier.name.clone());
        if let Some(interval) = tier.grouping_interval {
            let secs = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX);
            if secs > 0 {
                descriptor.min_time_slot = secs;
            }
        }
        if let Some(fill) = &tier.fill_option {
            descriptor.fill_option = fill.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration {0:?}")]
pub struct DurationParseError(pub String);

/// Parses an InfluxQL duration literal such as `90m`, `1h30m`, `7d` or `2w`.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let err = || DurationParseError(raw.to_string());
    let mut rest = raw.trim();
    if rest.is_empty() {
        return Err(err());
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(err());
        }
        let amount: u64 = rest[..digits].parse().map_err(|_| err())?;
        rest = &rest[digits..];

        let (unit, consumed) = if rest.starts_with("ms") {
            (Duration::from_millis(1), 2)
        } else if rest.starts_with('µ') {
            (Duration::from_micros(1), 'µ'.len_utf8())
        } else {
            match rest.chars().next() {
                Some('u') => (Duration::from_micros(1), 1),
                Some('s') => (Duration::from_secs(1), 1),
                Some('m') => (Duration::from_secs(60), 1),
                Some('h') => (Duration::from_secs(3_600), 1),
                Some('d') => (Duration::from_secs(86_400), 1),
                Some('w') => (Duration::from_secs(604_800), 1),
                _ => return Err(err()),
            }
        };
        rest = &rest[consumed..];

        let amount = u32::try_from(amount).map_err(|_| err())?;
        total = unit
            .checked_mul(amount)
            .and_then(|part| total.checked_add(part))
            .ok_or_else(err)?;
    }
    Ok(total)
}
