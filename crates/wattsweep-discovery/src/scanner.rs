//! Discovery scanner: sweeps the configured range and installs the result

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wattsweep_core::{enumerate_hosts, DeviceRecord};
use wattsweep_shelly::DeviceClient;

use crate::probe::probe_hosts;
use crate::registry::{sort_by_address, DeviceRegistry};

/// Discovery scanner service
pub struct DiscoveryScanner {
    range: String,
    client: DeviceClient,
    registry: Arc<DeviceRegistry>,
}

impl DiscoveryScanner {
    pub fn new(range: impl Into<String>, client: DeviceClient, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            range: range.into(),
            client,
            registry,
        }
    }

    /// Run a single sweep and install its result as the live registry.
    ///
    /// Devices that did not answer this time are dropped. A malformed range
    /// probes nothing and installs an empty registry.
    pub async fn sweep(&self, cancel: &CancellationToken) -> Vec<DeviceRecord> {
        let start = Instant::now();

        let hosts = enumerate_hosts(&self.range);
        debug!(range = %self.range, hosts = hosts.len(), "Starting discovery sweep");

        let found = probe_hosts(&self.client, &hosts, cancel).await;

        let mut devices: Vec<DeviceRecord> = found.values().cloned().collect();
        sort_by_address(&mut devices);

        self.registry.install(found).await;

        info!(
            found = devices.len(),
            duration_secs = %format!("{:.2}", start.elapsed().as_secs_f64()),
            "Device discovery completed"
        );
        devices
    }
}
