//! Concurrent device probing across a list of hosts

use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wattsweep_core::DeviceRecord;
use wattsweep_shelly::{probe_device, DeviceClient};

/// Probe every host at once and return the devices found, keyed by address.
///
/// Each probe checks `cancel` when it starts and skips if it is already
/// set; probes already talking to a host run to completion or timeout.
pub async fn probe_hosts(
    client: &DeviceClient,
    hosts: &[Ipv4Addr],
    cancel: &CancellationToken,
) -> HashMap<String, DeviceRecord> {
    let mut tasks = JoinSet::new();

    for &host in hosts {
        let client = client.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            if cancel.is_cancelled() {
                return None;
            }
            probe_device(&client, host).await
        });
    }

    let mut found = HashMap::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Some(device)) => {
                info!(ip = %device.ip, id = %device.id, name = %device.name, "Found device");
                found.insert(device.ip.clone(), device);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Probe task failed"),
        }
    }

    debug!("Probed {} hosts, found {} devices", hosts.len(), found.len());
    found
}
