use serde::Serialize;
use std::fmt;

/// Data-source type reported by the monitoring agent for a metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DsType {
    Gauge,
    Counter,
    Derive,
    Absolute,
    Other(String),
}

impl DsType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            v if v.eq_ignore_ascii_case("GAUGE") => DsType::Gauge,
            v if v.eq_ignore_ascii_case("COUNTER") => DsType::Counter,
            v if v.eq_ignore_ascii_case("DERIVE") => DsType::Derive,
            v if v.eq_ignore_ascii_case("ABSOLUTE") => DsType::Absolute,
            _ => DsType::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DsType::Gauge => "GAUGE",
            DsType::Counter => "COUNTER",
            DsType::Derive => "DERIVE",
            DsType::Absolute => "ABSOLUTE",
            DsType::Other(raw) => raw.as_str(),
        }
    }

    /// Counter-like series need rate derivation on the read path.
    pub fn is_counter(&self) -> bool {
        matches!(self, DsType::Counter | DsType::Derive)
    }
}

impl fmt::Display for DsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the metadata cache, keyed by (host, service, metric).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub host: String,
    pub service: String,
    pub metric: String,
    pub dstype: DsType,
    pub uom: String,
}

/// A decoded `host::service::metric` selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selector {
    pub host: String,
    pub service: String,
    pub metric: String,
}

impl Selector {
    pub fn new(
        host: impl Into<String>,
        service: impl Into<String>,
        metric: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            metric: metric.into(),
        }
    }

    /// Response key for this selector.
    pub fn key(&self) -> String {
        format!("{}::{}::{}", self.host, self.service, self.metric)
    }
}
