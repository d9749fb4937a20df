//! Device queries over the Shelly HTTP API

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};
use wattsweep_core::{DeviceId, DeviceRecord};

/// HTTP port devices answer on
pub const DEFAULT_DEVICE_PORT: u16 = 80;

/// Identification endpoint. Shelly firmware answers on `/shelly`; devices
/// that expose `/identify` instead need `identify_path` set accordingly.
pub const DEFAULT_IDENTIFY_PATH: &str = "/shelly";

/// Settings endpoint, used for the display name
pub const SETTINGS_PATH: &str = "/settings";

/// Live status endpoint, carries the meter readings
pub const STATUS_PATH: &str = "/status";

/// Per-request timeout while probing during discovery
pub const PROBE_TIMEOUT_MS: u64 = 2000;

/// Per-request timeout when fetching readings
pub const STATUS_TIMEOUT_MS: u64 = 5000;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} did not identify as a device")]
    NotADevice(String),
}

// Response payloads. Devices send `null` for unset values, so every field is
// an `Option` and both missing and null decode to `None`.

/// Identification response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyResponse {
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub auth: Option<bool>,
    #[serde(default)]
    pub fw: Option<String>,
    #[serde(default)]
    pub num_outputs: Option<u32>,
    #[serde(default)]
    pub num_meters: Option<u32>,
}

/// Settings response, only the naming fields are read
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsResponse {
    #[serde(default)]
    pub device: Option<SettingsDevice>,
    /// Some firmware puts the user-assigned name at the root
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsDevice {
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Status response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub meters: Option<Vec<Meter>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meter {
    #[serde(default)]
    pub power: Option<f64>,
    #[serde(default)]
    pub is_valid: Option<bool>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub counters: Option<Vec<f64>>,
}

impl StatusResponse {
    /// Power of every meter flagged valid, in report order
    pub fn valid_readings(&self) -> Vec<f64> {
        self.meters
            .iter()
            .flatten()
            .filter(|m| m.is_valid.unwrap_or(false))
            .map(|m| m.power.unwrap_or(0.0))
            .collect()
    }
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Port devices serve HTTP on
    pub port: u16,
    /// Path of the identification endpoint
    pub identify_path: String,
    /// Timeout for identify/settings requests
    pub probe_timeout: Duration,
    /// Timeout for status requests
    pub status_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DEVICE_PORT,
            identify_path: DEFAULT_IDENTIFY_PATH.to_string(),
            probe_timeout: Duration::from_millis(PROBE_TIMEOUT_MS),
            status_timeout: Duration::from_millis(STATUS_TIMEOUT_MS),
        }
    }
}

/// HTTP client for talking to devices. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl DeviceClient {
    pub fn new(config: ClientConfig) -> Result<Self, QueryError> {
        // Devices live on the LAN, never route them through a proxy
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(QueryError::Client)?;

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, host: &str, path: &str) -> String {
        if self.config.port == DEFAULT_DEVICE_PORT {
            format!("http://{}{}", host, path)
        } else {
            format!("http://{}:{}{}", host, self.config.port, path)
        }
    }

    /// GET `path` and decode the JSON body. With `any_status` the body is
    /// decoded whatever the HTTP code, and the code is only reported when
    /// the body does not decode.
    async fn get_json<T: DeserializeOwned>(
        &self,
        host: &str,
        path: &str,
        timeout: Duration,
        any_status: bool,
    ) -> Result<T, QueryError> {
        let url = self.url(host, path);
        trace!(url = %url, "GET");

        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|source| QueryError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() && !any_status {
            return Err(QueryError::Status { url, status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| QueryError::Transport {
                url: url.clone(),
                source,
            })?;

        serde_json::from_slice(&body).map_err(|source| {
            if status.is_success() {
                QueryError::Decode { url, source }
            } else {
                QueryError::Status { url, status }
            }
        })
    }

    /// Ask a host to identify itself. An empty type means it is not a device.
    pub async fn identify(&self, host: &str) -> Result<IdentifyResponse, QueryError> {
        let info: IdentifyResponse = self
            .get_json(host, &self.config.identify_path, self.config.probe_timeout, false)
            .await?;

        match info.device_type.as_deref() {
            Some(t) if !t.is_empty() => Ok(info),
            _ => Err(QueryError::NotADevice(host.to_string())),
        }
    }

    pub async fn settings(&self, host: &str) -> Result<SettingsResponse, QueryError> {
        self.get_json(host, SETTINGS_PATH, self.config.probe_timeout, false)
            .await
    }

    /// Read the live status. Some firmware answers with an error code but a
    /// usable body, so the body is decoded regardless of the code.
    pub async fn status(&self, host: &str) -> Result<StatusResponse, QueryError> {
        self.get_json(host, STATUS_PATH, self.config.status_timeout, true)
            .await
    }
}

/// Pick a display name: root name, device name, device hostname, root
/// hostname, then the device id. Empty strings count as missing.
pub fn resolve_display_name(settings: Option<&SettingsResponse>, id: &DeviceId) -> String {
    fn present(s: &Option<String>) -> Option<&str> {
        s.as_deref().filter(|s| !s.is_empty())
    }

    settings
        .and_then(|s| {
            let device = s.device.as_ref();
            present(&s.name)
                .or_else(|| device.and_then(|d| present(&d.name)))
                .or_else(|| device.and_then(|d| present(&d.hostname)))
                .or_else(|| present(&s.hostname))
        })
        .map(str::to_string)
        .unwrap_or_else(|| id.0.clone())
}

/// Identify a single host. Returns `None` for anything that is not a
/// reachable, well-formed device; the reason is only logged.
pub async fn probe_device(client: &DeviceClient, ip: Ipv4Addr) -> Option<DeviceRecord> {
    let host = ip.to_string();

    let info = match client.identify(&host).await {
        Ok(info) => info,
        Err(e) => {
            trace!(ip = %host, error = %e, "Not a device");
            return None;
        }
    };

    let device_type = info.device_type.unwrap_or_default();
    let id = DeviceId::derive(&device_type, info.mac.as_deref().unwrap_or_default());

    let settings = match client.settings(&host).await {
        Ok(settings) => Some(settings),
        Err(e) => {
            debug!(ip = %host, error = %e, "Failed to read settings, using device id as name");
            None
        }
    };
    let name = resolve_display_name(settings.as_ref(), &id);

    debug!(ip = %host, id = %id, name = %name, device_type = %device_type, "Identified device");
    Some(DeviceRecord::new(host, id, name, device_type))
}

/// Fetch the valid power readings of a device
pub async fn fetch_readings(client: &DeviceClient, host: &str) -> Result<Vec<f64>, QueryError> {
    let status = client.status(host).await?;
    Ok(status.valid_readings())
}
