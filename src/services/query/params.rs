use std::fmt;
use std::str::FromStr;
use url::form_urlencoded;

use crate::escape::{is_safe_identifier, query_unescape};
use crate::model::Selector;

const SELECTOR_SEPARATOR: &str = "::";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryParamError {
    #[error("Missing parameter: {0}")]
    Missing(&'static str),
    #[error("Invalid parameter: {0}")]
    Invalid(&'static str),
    #[error("Invalid parameter fill_option: {0}")]
    InvalidFillOption(String),
}

/// Policy for empty buckets in an aggregation result.
#[derive(Debug, Clone, PartialEq)]
pub enum FillOption {
    Linear,
    None,
    Null,
    Previous,
    Value(f64),
}

impl FromStr for FillOption {
    type Err = QueryParamError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "linear" => Ok(FillOption::Linear),
            "none" => Ok(FillOption::None),
            "null" => Ok(FillOption::Null),
            "previous" => Ok(FillOption::Previous),
            other => other
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(FillOption::Value)
                .ok_or_else(|| QueryParamError::InvalidFillOption(other.to_string())),
        }
    }
}

impl fmt::Display for FillOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillOption::Linear => f.write_str("linear"),
            FillOption::None => f.write_str("none"),
            FillOption::Null => f.write_str("null"),
            FillOption::Previous => f.write_str("previous"),
            FillOption::Value(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    Difference,
    PerSecond,
}

impl CounterMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "difference" => Some(CounterMode::Difference),
            "per_second" => Some(CounterMode::PerSecond),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterMode::Difference => "difference",
            CounterMode::PerSecond => "per_second",
        }
    }
}

/// Server-side defaults applied when a request omits a knob.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefaults {
    pub data_points: i64,
    pub min_time_slot: i64,
    pub fixed_time_slot: i64,
    pub fill_option: FillOption,
    pub counter_metrics_mode: CounterMode,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            data_points: 500,
            min_time_slot: 0,
            fixed_time_slot: 0,
            fill_option: FillOption::Null,
            counter_metrics_mode: CounterMode::PerSecond,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub include_tz_offset: bool,
    pub selectors: Vec<Selector>,
    pub data_points: i64,
    pub min_time_slot: i64,
    pub fixed_time_slot: i64,
    pub fill_option: FillOption,
    pub counter_metrics_mode: CounterMode,
    /// `Some` when pinned by the caller or resolved by tier selection.
    pub retention_policy: Option<String>,
}

/// Decoded request parameters from the query string and/or a form body, in
/// arrival order; repeated keys are kept.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    pub fn from_urlencoded(raw: &[u8]) -> Self {
        let mut params = Self::default();
        params.extend_urlencoded(raw);
        params
    }

    pub fn extend_urlencoded(&mut self, raw: &[u8]) {
        self.pairs.extend(
            form_urlencoded::parse(raw).map(|(key, value)| (key.into_owned(), value.into_owned())),
        );
    }

    /// First value for `key`, treating an empty value as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }
}

pub fn parse_query_params(
    params: &RequestParams,
    defaults: &QueryDefaults,
) -> Result<QueryDescriptor, QueryParamError> {
    let start_epoch = required_epoch(params, "start")?;
    let end_epoch = required_epoch(params, "end")?;
    let include_tz_offset = params.get("include_offset_timezone") == Some("1");

    if !params.contains("hsm") {
        return Err(QueryParamError::Missing("hsm"));
    }
    let selectors = params.get_all("hsm").filter_map(parse_selector).collect();

    let data_points = optional_number(params, "data_points", defaults.data_points)?;
    if data_points < 1 {
        return Err(QueryParamError::Invalid("data_points"));
    }
    let min_time_slot = optional_number(params, "min_time_slot", defaults.min_time_slot)?;
    if min_time_slot < 0 {
        return Err(QueryParamError::Invalid("min_time_slot"));
    }
    let fixed_time_slot = optional_number(params, "fixed_time_slot", defaults.fixed_time_slot)?;
    if fixed_time_slot < 0 {
        return Err(QueryParamError::Invalid("fixed_time_slot"));
    }

    let fill_option = match params.get("fill_option") {
        Some(raw) => raw.parse::<FillOption>()?,
        None => defaults.fill_option.clone(),
    };

    let counter_metrics_mode = params
        .get("counter_metrics_mode")
        .and_then(CounterMode::parse)
        .unwrap_or(defaults.counter_metrics_mode);

    let retention_policy = match params.get("rp") {
        Some(rp) if is_safe_identifier(rp) => Some(rp.to_string()),
        Some(rp) => {
            tracing::warn!(rp, "ignoring unsafe retention policy name");
            None
        }
        None => None,
    };

    Ok(QueryDescriptor {
        start_epoch,
        end_epoch,
        include_tz_offset,
        selectors,
        data_points,
        min_time_slot,
        fixed_time_slot,
        fill_option,
        counter_metrics_mode,
        retention_policy,
    })
}

fn required_epoch(params: &RequestParams, key: &'static str) -> Result<i64, QueryParamError> {
    params
        .get(key)
        .ok_or(QueryParamError::Missing(key))?
        .parse::<i64>()
        .map_err(|_| QueryParamError::Invalid(key))
}

fn optional_number(
    params: &RequestParams,
    key: &'static str,
    default: i64,
) -> Result<i64, QueryParamError> {
    match params.get(key) {
        Some(raw) => raw.parse::<i64>().map_err(|_| QueryParamError::Invalid(key)),
        None => Ok(default),
    }
}

fn parse_selector(raw: &str) -> Option<Selector> {
    let parts: Vec<&str> = raw.split(SELECTOR_SEPARATOR).collect();
    let [host, service, metric] = parts.as_slice() else {
        tracing::warn!(hsm = raw, "dropping selector without exactly three parts");
        return None;
    };

    let decode = |part: &str| match query_unescape(part) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            tracing::warn!(hsm = raw, error = %err, "dropping selector with invalid escape");
            None
        }
    };
    let host = decode(*host)?;
    let service = decode(*service)?;
    let metric = decode(*metric)?;

    if !is_safe_identifier(&host) {
        tracing::warn!(hsm = raw, "dropping selector with unsafe host name");
        return None;
    }
    Some(Selector::new(host, service, metric))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(query: &str) -> RequestParams {
        RequestParams::from_urlencoded(query.as_bytes())
    }

    fn parse(query: &str) -> Result<QueryDescriptor, QueryParamError> {
        parse_query_params(&params(query), &QueryDefaults::default())
    }

    #[test]
    fn parses_full_request() {
        let desc = parse(
            "start=100&end=400&hsm=web%252B01%3A%3ADisk%2B%252F%3A%3Aused&hsm=db::CPU::idle\
             &data_points=50&min_time_slot=60&fixed_time_slot=0&fill_option=previous\
             &counter_metrics_mode=difference&rp=one_week&include_offset_timezone=1",
        )
        .unwrap();

        assert_eq!(desc.start_epoch, 100);
        assert_eq!(desc.end_epoch, 400);
        assert!(desc.include_tz_offset);
        assert_eq!(
            desc.selectors,
            vec![
                Selector::new("web+01", "Disk /", "used"),
                Selector::new("db", "CPU", "idle"),
            ]
        );
        assert_eq!(desc.data_points, 50);
        assert_eq!(desc.min_time_slot, 60);
        assert_eq!(desc.fill_option, FillOption::Previous);
        assert_eq!(desc.counter_metrics_mode, CounterMode::Difference);
        assert_eq!(desc.retention_policy.as_deref(), Some("one_week"));
    }

    #[test]
    fn applies_defaults_when_knobs_are_absent() {
        let defaults = QueryDefaults {
            data_points: 120,
            min_time_slot: 30,
            fixed_time_slot: 10,
            fill_option: FillOption::Value(0.0),
            counter_metrics_mode: CounterMode::Difference,
        };
        let desc = parse_query_params(&params("start=1&end=2&hsm=a::b::c"), &defaults).unwrap();
        assert_eq!(desc.data_points, 120);
        assert_eq!(desc.min_time_slot, 30);
        assert_eq!(desc.fixed_time_slot, 10);
        assert_eq!(desc.fill_option, FillOption::Value(0.0));
        assert_eq!(desc.counter_metrics_mode, CounterMode::Difference);
        assert!(!desc.include_tz_offset);
        assert!(desc.retention_policy.is_none());
    }

    #[test]
    fn start_and_end_are_mandatory_integers() {
        assert_eq!(parse("end=2&hsm=a::b::c"), Err(QueryParamError::Missing("start")));
        assert_eq!(parse("start=1&hsm=a::b::c"), Err(QueryParamError::Missing("end")));
        assert_eq!(
            parse("start=soon&end=2&hsm=a::b::c"),
            Err(QueryParamError::Invalid("start"))
        );
        assert_eq!(
            parse("start=1&end=2.5&hsm=a::b::c"),
            Err(QueryParamError::Invalid("end"))
        );
    }

    #[test]
    fn hsm_is_mandatory_but_bad_entries_are_dropped() {
        assert_eq!(parse("start=1&end=2"), Err(QueryParamError::Missing("hsm")));

        let desc = parse("start=1&end=2&hsm=a::b&hsm=a::b::c::d&hsm=%25zz::b::c&hsm=x%2522::s::m")
            .unwrap();
        assert!(desc.selectors.is_empty());

        let desc = parse("start=1&end=2&hsm=a::b&hsm=h::s::m").unwrap();
        assert_eq!(desc.selectors, vec![Selector::new("h", "s", "m")]);
    }

    #[test]
    fn non_numeric_knobs_are_rejected() {
        assert_eq!(
            parse("start=1&end=2&hsm=a::b::c&data_points=many"),
            Err(QueryParamError::Invalid("data_points"))
        );
        assert_eq!(
            parse("start=1&end=2&hsm=a::b::c&data_points=0"),
            Err(QueryParamError::Invalid("data_points"))
        );
        assert_eq!(
            parse("start=1&end=2&hsm=a::b::c&min_time_slot=1m"),
            Err(QueryParamError::Invalid("min_time_slot"))
        );
        assert_eq!(
            parse("start=1&end=2&hsm=a::b::c&fixed_time_slot=-5"),
            Err(QueryParamError::Invalid("fixed_time_slot"))
        );
    }

    #[test]
    fn fill_option_accepts_literals_and_numbers_only() {
        for (raw, expected) in [
            ("linear", FillOption::Linear),
            ("none", FillOption::None),
            ("null", FillOption::Null),
            ("previous", FillOption::Previous),
            ("0", FillOption::Value(0.0)),
            ("-1.5", FillOption::Value(-1.5)),
        ] {
            assert_eq!(raw.parse::<FillOption>().unwrap(), expected);
        }

        for raw in ["zero", "Linear", "1;DROP", "NaN", "inf"] {
            let err = raw.parse::<FillOption>().unwrap_err();
            assert_eq!(err, QueryParamError::InvalidFillOption(raw.to_string()));
            assert!(err.to_string().contains(raw));
        }

        assert!(matches!(
            parse("start=1&end=2&hsm=a::b::c&fill_option=bogus"),
            Err(QueryParamError::InvalidFillOption(_))
        ));
    }

    #[test]
    fn fill_option_renders_canonically() {
        assert_eq!(FillOption::Value(0.0).to_string(), "0");
        assert_eq!(FillOption::Value(-2.5).to_string(), "-2.5");
        assert_eq!(FillOption::Previous.to_string(), "previous");
    }

    #[test]
    fn unknown_counter_mode_falls_back() {
        let desc = parse("start=1&end=2&hsm=a::b::c&counter_metrics_mode=rate").unwrap();
        assert_eq!(desc.counter_metrics_mode, CounterMode::PerSecond);
    }

    #[test]
    fn unsafe_retention_policy_is_ignored() {
        let desc = parse("start=1&end=2&hsm=a::b::c&rp=x%22%3B%20DROP").unwrap();
        assert!(desc.retention_policy.is_none());
        let desc = parse("start=1&end=2&hsm=a::b::c&rp=a%3Bb").unwrap();
        assert!(desc.retention_policy.is_none());
    }
}
