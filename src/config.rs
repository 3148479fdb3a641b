use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::escape::is_safe_identifier;
use crate::services::query::params::{CounterMode, FillOption, QueryDefaults};
use crate::services::query::retention::{parse_duration, RetentionTier, RetentionTiers};

const DEFAULT_UPDATES_PORTS: [u16; 4] = [1640, 1641, 1642, 1643];
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct BasicCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct InfluxConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    /// Written to by ingestion and used for reads no tier claims.
    pub retention_policy: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub auth: BasicCredentials,
    pub data_dir: PathBuf,
    pub updates_host: String,
    pub updates_ports: Vec<u16>,
    pub expected_results_count: usize,
    /// Largest ingestion body accepted on an update listener.
    pub max_payload_bytes: usize,
    pub metadata_queue_capacity: usize,
    pub metadata_max_concurrency: usize,
    pub queries_host: String,
    pub queries_port: u16,
    pub query_defaults: QueryDefaults,
    pub downsampling: RetentionTiers,
    pub influx: InfluxConfig,
    /// Fixed offset added to timestamps on request; the local zone when unset.
    pub tz_offset_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auth_user: Option<String>,
    #[serde(default)]
    auth_password: Option<String>,
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    updates_host: Option<String>,
    #[serde(default)]
    updates_ports: Option<Vec<u16>>,
    #[serde(default)]
    expected_results_count: Option<usize>,
    #[serde(default)]
    max_payload_bytes: Option<usize>,
    #[serde(default)]
    metadata_queue: Option<usize>,
    #[serde(default)]
    metadata_concurrency: Option<usize>,
    #[serde(default)]
    queries_host: Option<String>,
    #[serde(default)]
    queries_port: Option<u16>,
    #[serde(default)]
    fill_option: Option<String>,
    #[serde(default)]
    data_points: Option<i64>,
    #[serde(default)]
    min_time_slot: Option<i64>,
    #[serde(default)]
    fixed_time_slot: Option<i64>,
    #[serde(default)]
    counter_metrics_mode: Option<String>,
    #[serde(default)]
    influxdb_url: Option<String>,
    #[serde(default)]
    influxdb_user: Option<String>,
    #[serde(default)]
    influxdb_password: Option<String>,
    #[serde(default)]
    influxdb_database: Option<String>,
    #[serde(default)]
    influxdb_retention_policy: Option<String>,
    #[serde(default)]
    influxdb_timeout_seconds: Option<u64>,
    #[serde(default)]
    tz_offset_seconds: Option<i64>,
    #[serde(default)]
    downsampling: Vec<DownsamplingEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DownsamplingEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    grouping_interval: Option<String>,
    #[serde(default)]
    fill_option: Option<String>,
}

fn config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        env::var("GATEWAY_CONFIG_PATH")
            .ok()
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    })
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Reads one setting: a non-empty environment value wins over the file.
struct Settings<'a, F: Fn(&str) -> Option<String>> {
    env: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Settings<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.env)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.string(key)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable setting");
                None
            }
        }
    }
}

impl GatewayConfig {
    pub fn from_env(config_path_arg: Option<PathBuf>) -> Result<Self> {
        dotenv().ok();

        let file = match config_path(config_path_arg) {
            Some(path) => {
                let file = load_config_file(&path)?;
                tracing::info!(path = %path.display(), "loaded config file");
                file
            }
            None => ConfigFile::default(),
        };
        Self::from_sources(&|key: &str| env::var(key).ok(), file)
    }

    fn from_sources<F: Fn(&str) -> Option<String>>(env: &F, file: ConfigFile) -> Result<Self> {
        let settings = Settings { env };

        let user = settings
            .string("GATEWAY_AUTH_USER")
            .or(file.auth_user)
            .context("GATEWAY_AUTH_USER is required (or auth_user in the config file)")?;
        let password = settings
            .string("GATEWAY_AUTH_PASSWORD")
            .or(file.auth_password)
            .context("GATEWAY_AUTH_PASSWORD is required (or auth_password in the config file)")?;

        let data_dir = settings
            .string("GATEWAY_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| PathBuf::from("./var/data"));

        let updates_host = settings
            .string("GATEWAY_UPDATES_HOST")
            .or(file.updates_host)
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let updates_ports = match settings.string("GATEWAY_UPDATES_PORTS") {
            Some(raw) => parse_port_list(&raw)?,
            None => file
                .updates_ports
                .filter(|ports| !ports.is_empty())
                .unwrap_or_else(|| DEFAULT_UPDATES_PORTS.to_vec()),
        };
        let expected_results_count = settings
            .parsed("GATEWAY_EXPECTED_RESULTS_COUNT")
            .or(file.expected_results_count)
            .unwrap_or(500);
        let max_payload_bytes = settings
            .parsed::<usize>("GATEWAY_MAX_PAYLOAD_BYTES")
            .or(file.max_payload_bytes)
            .filter(|v| *v != 0)
            .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES);
        let metadata_queue_capacity = settings
            .parsed::<usize>("GATEWAY_METADATA_QUEUE")
            .or(file.metadata_queue)
            .filter(|v| *v != 0)
            .unwrap_or(updates_ports.len());
        let metadata_max_concurrency = settings
            .parsed::<usize>("GATEWAY_METADATA_CONCURRENCY")
            .or(file.metadata_concurrency)
            .filter(|v| *v != 0)
            .unwrap_or(updates_ports.len());

        let queries_host = settings
            .string("GATEWAY_QUERIES_HOST")
            .or(file.queries_host)
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let queries_port = settings
            .parsed("GATEWAY_QUERIES_PORT")
            .or(file.queries_port)
            .unwrap_or(1660);

        let query_defaults = QueryDefaults {
            data_points: settings
                .parsed::<i64>("GATEWAY_DATA_POINTS")
                .or(file.data_points)
                .filter(|v| *v >= 1)
                .unwrap_or(500),
            min_time_slot: settings
                .parsed::<i64>("GATEWAY_MIN_TIME_SLOT")
                .or(file.min_time_slot)
                .filter(|v| *v >= 0)
                .unwrap_or(0),
            fixed_time_slot: settings
                .parsed::<i64>("GATEWAY_FIXED_TIME_SLOT")
                .or(file.fixed_time_slot)
                .filter(|v| *v >= 0)
                .unwrap_or(0),
            fill_option: settings
                .string("GATEWAY_FILL_OPTION")
                .or(file.fill_option)
                .and_then(|raw| match raw.parse::<FillOption>() {
                    Ok(fill) => Some(fill),
                    Err(err) => {
                        tracing::warn!(error = %err, "invalid default fill option; using null");
                        None
                    }
                })
                .unwrap_or(FillOption::Null),
            counter_metrics_mode: settings
                .string("GATEWAY_COUNTER_METRICS_MODE")
                .or(file.counter_metrics_mode)
                .and_then(|raw| CounterMode::parse(&raw))
                .unwrap_or(CounterMode::PerSecond),
        };

        let influx = InfluxConfig {
            url: settings
                .string("GATEWAY_INFLUXDB_URL")
                .or(file.influxdb_url)
                .unwrap_or_else(|| "http://127.0.0.1:8086".to_string()),
            username: settings.string("GATEWAY_INFLUXDB_USER").or(file.influxdb_user),
            password: settings
                .string("GATEWAY_INFLUXDB_PASSWORD")
                .or(file.influxdb_password),
            database: settings
                .string("GATEWAY_INFLUXDB_DATABASE")
                .or(file.influxdb_database)
                .unwrap_or_else(|| "metrics".to_string()),
            retention_policy: settings
                .string("GATEWAY_INFLUXDB_RETENTION_POLICY")
                .or(file.influxdb_retention_policy)
                .unwrap_or_else(|| "autogen".to_string()),
            timeout: Duration::from_secs(
                settings
                    .parsed::<u64>("GATEWAY_INFLUXDB_TIMEOUT_SECONDS")
                    .or(file.influxdb_timeout_seconds)
                    .filter(|v| *v != 0)
                    .unwrap_or(30),
            ),
        };
        if !is_safe_identifier(&influx.database) {
            anyhow::bail!("influxdb database name {:?} is not a safe identifier", influx.database);
        }
        if !is_safe_identifier(&influx.retention_policy) {
            anyhow::bail!(
                "influxdb retention policy {:?} is not a safe identifier",
                influx.retention_policy
            );
        }

        let tz_offset_seconds = settings
            .parsed("GATEWAY_TZ_OFFSET_SECONDS")
            .or(file.tz_offset_seconds);

        let downsampling = parse_downsampling(file.downsampling)?;

        Ok(Self {
            auth: BasicCredentials { user, password },
            data_dir,
            updates_host,
            updates_ports,
            expected_results_count,
            max_payload_bytes,
            metadata_queue_capacity,
            metadata_max_concurrency,
            queries_host,
            queries_port,
            query_defaults,
            downsampling,
            influx,
            tz_offset_seconds,
        })
    }

    /// Effective configuration with secrets redacted, for `--print-config`.
    pub fn summary(&self) -> serde_json::Value {
        let tiers: Vec<_> = self
            .downsampling
            .iter()
            .map(|tier| {
                json!({
                    "name": tier.name,
                    "duration_seconds": tier.min_age.as_secs(),
                    "grouping_interval_seconds": tier.grouping_interval.map(|d| d.as_secs()),
                    "fill_option": tier.fill_option.as_ref().map(ToString::to_string),
                })
            })
            .collect();

        json!({
            "auth_user": self.auth.user,
            "data_dir": self.data_dir.display().to_string(),
            "updates_host": self.updates_host,
            "updates_ports": self.updates_ports,
            "expected_results_count": self.expected_results_count,
            "max_payload_bytes": self.max_payload_bytes,
            "metadata_queue": self.metadata_queue_capacity,
            "metadata_concurrency": self.metadata_max_concurrency,
            "queries_host": self.queries_host,
            "queries_port": self.queries_port,
            "fill_option": self.query_defaults.fill_option.to_string(),
            "data_points": self.query_defaults.data_points,
            "min_time_slot": self.query_defaults.min_time_slot,
            "fixed_time_slot": self.query_defaults.fixed_time_slot,
            "counter_metrics_mode": self.query_defaults.counter_metrics_mode.as_str(),
            "influxdb_url": self.influx.url,
            "influxdb_user": self.influx.username,
            "influxdb_database": self.influx.database,
            "influxdb_retention_policy": self.influx.retention_policy,
            "influxdb_timeout_seconds": self.influx.timeout.as_secs(),
            "tz_offset_seconds": self.tz_offset_seconds,
            "downsampling": tiers,
        })
    }
}

fn parse_port_list(raw: &str) -> Result<Vec<u16>> {
    let ports = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u16>()
                .with_context(|| format!("invalid port {part:?} in GATEWAY_UPDATES_PORTS"))
        })
        .collect::<Result<Vec<_>>>()?;
    if ports.is_empty() {
        anyhow::bail!("GATEWAY_UPDATES_PORTS lists no ports");
    }
    Ok(ports)
}

fn parse_downsampling(entries: Vec<DownsamplingEntry>) -> Result<RetentionTiers> {
    let mut tiers = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.into_iter().enumerate() {
        let name = entry
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .with_context(|| format!("downsampling[{idx}] has no name"))?;
        if !is_safe_identifier(&name) {
            anyhow::bail!("downsampling[{idx}] name {name:?} is not a safe identifier");
        }
        let duration = entry
            .duration
            .with_context(|| format!("downsampling[{idx}] ({name}) has no duration"))?;
        let min_age = parse_duration(&duration)
            .with_context(|| format!("downsampling[{idx}] ({name}) duration"))?;
        let grouping_interval = entry
            .grouping_interval
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| parse_duration(&raw))
            .transpose()
            .with_context(|| format!("downsampling[{idx}] ({name}) grouping_interval"))?;
        let fill_option = entry
            .fill_option
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| raw.parse::<FillOption>())
            .transpose()
            .with_context(|| format!("downsampling[{idx}] ({name}) fill_option"))?;

        tiers.push(RetentionTier {
            name,
            min_age,
            grouping_interval,
            fill_option,
        });
    }
    Ok(RetentionTiers::new(tiers))
}
