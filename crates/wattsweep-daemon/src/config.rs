//! Configuration loading and validation
//!
//! Settings come from built-in defaults, then an optional TOML file, then
//! environment variables, each layer overriding the one before.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use wattsweep_core::AddressRange;
use wattsweep_discovery::EngineConfig;
use wattsweep_shelly::{ClientConfig, DEFAULT_DEVICE_PORT, DEFAULT_IDENTIFY_PATH};

/// Environment variables read by [`Config::apply_env`]
pub const ENV_NETWORK_RANGE: &str = "NETWORK_RANGE";
pub const ENV_DISCOVERY_INTERVAL: &str = "DISCOVERY_INTERVAL";
pub const ENV_METRICS_INTERVAL: &str = "METRICS_INTERVAL";
pub const ENV_HTTP_PORT: &str = "HTTP_PORT";
pub const ENV_DEVICE_PORT: &str = "DEVICE_PORT";
pub const ENV_IDENTIFY_PATH: &str = "IDENTIFY_PATH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid {key} {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Listen port for the metrics endpoint, e.g. ":8080"
    #[serde(default = "default_http_port")]
    pub http_port: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
        }
    }
}

fn default_http_port() -> String {
    ":8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// CIDR range to sweep
    #[serde(default = "default_network_range")]
    pub network_range: String,
    /// Time between discovery sweeps, e.g. "60s"
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval: String,
    /// Time between collection cycles, e.g. "10s"
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: String,
    /// Wait before the first collection cycle
    #[serde(default = "default_collection_delay")]
    pub collection_start_delay: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            network_range: default_network_range(),
            discovery_interval: default_discovery_interval(),
            metrics_interval: default_metrics_interval(),
            collection_start_delay: default_collection_delay(),
        }
    }
}

fn default_network_range() -> String {
    "10.10.10.0/24".to_string()
}

fn default_discovery_interval() -> String {
    "60s".to_string()
}

fn default_metrics_interval() -> String {
    "10s".to_string()
}

fn default_collection_delay() -> String {
    "5s".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// HTTP port devices listen on
    #[serde(default = "default_device_port")]
    pub port: u16,
    /// Identification endpoint path
    #[serde(default = "default_identify_path")]
    pub identify_path: String,
    /// Timeout for identify/settings requests
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Timeout for status requests
    #[serde(default = "default_status_timeout")]
    pub status_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_device_port(),
            identify_path: default_identify_path(),
            probe_timeout_ms: default_probe_timeout(),
            status_timeout_ms: default_status_timeout(),
        }
    }
}

fn default_device_port() -> u16 {
    DEFAULT_DEVICE_PORT
}

fn default_identify_path() -> String {
    DEFAULT_IDENTIFY_PATH.to_string()
}

fn default_probe_timeout() -> u64 {
    wattsweep_shelly::query::PROBE_TIMEOUT_MS
}

fn default_status_timeout() -> u64 {
    wattsweep_shelly::query::STATUS_TIMEOUT_MS
}

impl Config {
    /// Override settings from environment-style lookups. Empty values are
    /// treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(range) = get(ENV_NETWORK_RANGE) {
            self.discovery.network_range = range;
        }
        if let Some(interval) = get(ENV_DISCOVERY_INTERVAL) {
            self.discovery.discovery_interval = interval;
        }
        if let Some(interval) = get(ENV_METRICS_INTERVAL) {
            self.discovery.metrics_interval = interval;
        }
        if let Some(port) = get(ENV_HTTP_PORT) {
            self.daemon.http_port = port;
        }
        if let Some(port) = get(ENV_DEVICE_PORT) {
            self.device.port = port.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key: ENV_DEVICE_PORT,
                value: port.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(path) = get(ENV_IDENTIFY_PATH) {
            self.device.identify_path = path;
        }
        Ok(())
    }

    /// Check everything that must be right before starting.
    ///
    /// A bad range only warns: sweeps will find nothing until it is fixed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_config()?;
        self.listen_address()?;

        if let Err(e) = self.discovery.network_range.parse::<AddressRange>() {
            warn!(
                range = %self.discovery.network_range,
                error = %e,
                "Network range is invalid, discovery will find no devices"
            );
        }
        Ok(())
    }

    /// Address to bind the HTTP server to, e.g. "0.0.0.0:8080"
    pub fn listen_address(&self) -> Result<String, ConfigError> {
        let raw = self.daemon.http_port.trim();
        let port = raw.strip_prefix(':').unwrap_or(raw);
        port.parse::<u16>().map_err(|e| ConfigError::Invalid {
            key: ENV_HTTP_PORT,
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(format!("0.0.0.0:{}", port))
    }

    /// Convert to EngineConfig
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            network_range: self.discovery.network_range.clone(),
            discovery_interval: parse_interval(ENV_DISCOVERY_INTERVAL, &self.discovery.discovery_interval)?,
            metrics_interval: parse_interval(ENV_METRICS_INTERVAL, &self.discovery.metrics_interval)?,
            collection_start_delay: humantime::parse_duration(&self.discovery.collection_start_delay)
                .map_err(|e| ConfigError::Invalid {
                    key: "collection_start_delay",
                    value: self.discovery.collection_start_delay.clone(),
                    reason: e.to_string(),
                })?,
        })
    }

    /// Convert to the device ClientConfig
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            port: self.device.port,
            identify_path: self.device.identify_path.clone(),
            probe_timeout: Duration::from_millis(self.device.probe_timeout_ms),
            status_timeout: Duration::from_millis(self.device.status_timeout_ms),
        }
    }
}

/// Parse a loop interval; zero is rejected since it would spin
fn parse_interval(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let interval = match humantime::parse_duration(value) {
        Ok(interval) => interval,
        Err(e) => parse_fractional(value).ok_or_else(|| ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })?,
    };

    if interval.is_zero() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "interval must be greater than zero".to_string(),
        });
    }
    Ok(interval)
}

/// Parse unit-suffixed values with fractions, such as `1.5m` or `1h2.5m`,
/// which humantime rejects
fn parse_fractional(value: &str) -> Option<Duration> {
    let mut rest = value;
    let mut secs = 0.0_f64;
    if rest.is_empty() {
        return None;
    }

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        secs += number * scale;
    }

    Duration::try_from_secs_f64(secs).ok()
}

/// Load configuration from file, or defaults when the file does not exist
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Load the file, apply environment overrides, and validate
pub fn load<F>(path: &Path, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = load_config(path)?;
    config.apply_env(lookup)?;
    config.validate()?;
    Ok(config)
}
