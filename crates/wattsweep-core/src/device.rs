//! Device types for tracking discovered power meters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of trailing hardware-identifier characters kept in a device id
const HWID_SUFFIX_LEN: usize = 6;

/// Stable identifier for a device, derived from its type and hardware ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Derive the id as `{type}-{last 6 chars of hwid}`, lower-cased.
    ///
    /// A hardware identifier shorter than six characters is used whole.
    pub fn derive(device_type: &str, hwid: &str) -> Self {
        let suffix = match hwid.char_indices().rev().nth(HWID_SUFFIX_LEN - 1) {
            Some((idx, _)) => &hwid[idx..],
            None => hwid,
        };
        Self(format!(
            "{}-{}",
            device_type.to_lowercase(),
            suffix.to_lowercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A device found by a discovery sweep.
///
/// Records are never patched: a later sweep builds fresh records and the
/// registry replaces the old ones wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Network address the device answered on
    pub ip: String,
    /// Stable id (see [`DeviceId::derive`])
    pub id: DeviceId,
    /// Human-readable name, best effort
    pub name: String,
    /// Device-reported type, e.g. `SHPLG-S`
    pub device_type: String,
    /// When the probe identified the device
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn new(ip: impl Into<String>, id: DeviceId, name: String, device_type: String) -> Self {
        Self {
            ip: ip.into(),
            id,
            name,
            device_type,
            last_seen: Utc::now(),
        }
    }

    /// Label tuple this device's readings are stored under
    pub fn labels(&self) -> SampleLabels {
        SampleLabels {
            device_id: self.id.0.clone(),
            device_name: self.name.clone(),
            device_type: self.device_type.clone(),
            ip_address: self.ip.clone(),
        }
    }
}

/// Identity of one metrics store entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleLabels {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
    pub ip_address: String,
}

impl SampleLabels {
    /// Values in the order of [`crate::store::LABEL_NAMES`]
    pub fn values(&self) -> [&str; 4] {
        [
            &self.device_id,
            &self.device_name,
            &self.device_type,
            &self.ip_address,
        ]
    }
}

/// One stored reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub labels: SampleLabels,
    pub watts: f64,
}
