//! wattsweep Shelly - HTTP client for power-metering devices
//!
//! This crate speaks the fixed device contract used by wattsweep:
//! identification, settings (display name) and live status (meter readings).

pub mod query;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use query::{
    fetch_readings, probe_device, resolve_display_name, ClientConfig, DeviceClient,
    IdentifyResponse, Meter, QueryError, SettingsResponse, StatusResponse, DEFAULT_DEVICE_PORT,
    DEFAULT_IDENTIFY_PATH,
};
