//! Metrics collector: polls every known device and refreshes the store

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wattsweep_core::{DeviceRecord, PowerStore};
use wattsweep_shelly::{fetch_readings, DeviceClient};

use crate::registry::DeviceRegistry;

/// Outcome of one collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Devices in the registry snapshot the cycle worked from
    pub attempted: usize,
    /// Devices whose status was fetched and decoded
    pub succeeded: usize,
    pub duration: Duration,
}

pub struct MetricsCollector {
    client: DeviceClient,
    registry: Arc<DeviceRegistry>,
    store: Arc<PowerStore>,
}

impl MetricsCollector {
    pub fn new(client: DeviceClient, registry: Arc<DeviceRegistry>, store: Arc<PowerStore>) -> Self {
        Self {
            client,
            registry,
            store,
        }
    }

    /// Run one collection cycle over the current registry snapshot.
    ///
    /// With no known devices the store is left as it is. Otherwise it is
    /// cleared first, so devices that fail this cycle disappear from it.
    pub async fn collect(&self, cancel: &CancellationToken) -> CycleReport {
        let devices: Vec<DeviceRecord> = self.registry.snapshot().await.values().cloned().collect();

        if devices.is_empty() {
            info!("No known devices to collect metrics from");
            return CycleReport::default();
        }

        let start = Instant::now();
        self.store.clear().await;

        let mut tasks = JoinSet::new();
        for device in &devices {
            let client = self.client.clone();
            let store = self.store.clone();
            let cancel = cancel.clone();
            let device = device.clone();
            tasks.spawn(async move {
                if cancel.is_cancelled() {
                    return false;
                }
                collect_device(&client, &store, &device).await
            });
        }

        let mut succeeded = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Collection task failed"),
            }
        }

        let report = CycleReport {
            attempted: devices.len(),
            succeeded,
            duration: start.elapsed(),
        };
        info!(
            succeeded = report.succeeded,
            attempted = report.attempted,
            duration_secs = %format!("{:.2}", report.duration.as_secs_f64()),
            "Metrics collection completed"
        );
        report
    }
}

/// Fetch one device's readings and store the valid ones.
/// Network I/O happens before the store lock is taken.
async fn collect_device(client: &DeviceClient, store: &PowerStore, device: &DeviceRecord) -> bool {
    match fetch_readings(client, &device.ip).await {
        Ok(readings) => {
            store.set_all(&device.labels(), readings).await;
            true
        }
        Err(e) => {
            warn!(ip = %device.ip, device = %device.id, error = %e, "Failed to collect metrics");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use wattsweep_core::{DeviceId, SampleLabels};
    use wattsweep_shelly::testing::{free_port, test_client, FakeDevice, StatusCode};

    fn record(ip: &str, mac: &str, name: &str) -> DeviceRecord {
        DeviceRecord::new(
            ip,
            DeviceId::derive("SHPLG-S", mac),
            name.to_string(),
            "SHPLG-S".to_string(),
        )
    }

    async fn registry_with(records: &[DeviceRecord]) -> Arc<DeviceRegistry> {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .install(records.iter().map(|r| (r.ip.clone(), r.clone())).collect::<HashMap<_, _>>())
            .await;
        registry
    }

    #[tokio::test]
    async fn test_collect_stores_valid_readings_of_responding_devices() {
        let port = free_port().await.unwrap();
        let _valid = FakeDevice::shelly("SHPLG-S", "000001")
            .with_meters(&[(42.5, true)])
            .spawn(Ipv4Addr::new(127, 0, 0, 2), port)
            .await
            .unwrap();
        let _invalid_only = FakeDevice::shelly("SHPLG-S", "000002")
            .with_meters(&[(99.0, false)])
            .spawn(Ipv4Addr::new(127, 0, 0, 3), port)
            .await
            .unwrap();
        let _broken = FakeDevice::shelly("SHPLG-S", "000003")
            .with_status_body(StatusCode::OK, "not json")
            .spawn(Ipv4Addr::new(127, 0, 0, 4), port)
            .await
            .unwrap();

        let plug = record("127.0.0.2", "000001", "Desk");
        let registry = registry_with(&[
            plug.clone(),
            record("127.0.0.3", "000002", "Idle"),
            record("127.0.0.4", "000003", "Broken"),
            record("127.0.0.5", "000004", "Gone"),
        ])
        .await;
        let store = Arc::new(PowerStore::new().unwrap());

        let collector = MetricsCollector::new(test_client(port), registry, store.clone());
        let report = collector.collect(&CancellationToken::new()).await;

        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 2);

        let samples = store.samples().await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].labels, plug.labels());
        assert_eq!(samples[0].watts, 42.5);
    }

    #[tokio::test]
    async fn test_collect_clears_previous_cycle() {
        let port = free_port().await.unwrap();
        let store = Arc::new(PowerStore::new().unwrap());
        let gone = record("127.0.0.2", "000001", "Gone");
        store.set(&gone.labels(), 10.0).await;

        let registry = registry_with(&[gone]).await;
        let collector = MetricsCollector::new(test_client(port), registry, store.clone());
        let report = collector.collect(&CancellationToken::new()).await;

        assert_eq!(report.succeeded, 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_collect_empty_registry_leaves_store_untouched() {
        let store = Arc::new(PowerStore::new().unwrap());
        let labels = SampleLabels {
            device_id: "shplg-s-000001".to_string(),
            device_name: "Desk".to_string(),
            device_type: "SHPLG-S".to_string(),
            ip_address: "10.0.0.2".to_string(),
        };
        store.set(&labels, 5.0).await;

        let collector = MetricsCollector::new(
            test_client(1),
            Arc::new(DeviceRegistry::new()),
            store.clone(),
        );
        let report = collector.collect(&CancellationToken::new()).await;

        assert_eq!(report, CycleReport::default());
        assert_eq!(store.samples().await.len(), 1);
    }

    #[tokio::test]
    async fn test_collect_last_valid_meter_wins() {
        let port = free_port().await.unwrap();
        let _em = FakeDevice::shelly("SHEM", "000001")
            .with_meters(&[(10.0, true), (20.0, false), (30.0, true)])
            .spawn(Ipv4Addr::new(127, 0, 0, 2), port)
            .await
            .unwrap();

        let registry = registry_with(&[record("127.0.0.2", "000001", "Mains")]).await;
        let store = Arc::new(PowerStore::new().unwrap());
        MetricsCollector::new(test_client(port), registry, store.clone())
            .collect(&CancellationToken::new())
            .await;

        let samples = store.samples().await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].watts, 30.0);
    }

    #[tokio::test]
    async fn test_collect_cancelled_skips_devices() {
        let port = free_port().await.unwrap();
        let device = FakeDevice::shelly("SHPLG-S", "000001")
            .with_meters(&[(42.5, true)])
            .spawn(Ipv4Addr::new(127, 0, 0, 2), port)
            .await
            .unwrap();

        let registry = registry_with(&[record("127.0.0.2", "000001", "Desk")]).await;
        let store = Arc::new(PowerStore::new().unwrap());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = MetricsCollector::new(test_client(port), registry, store.clone())
            .collect(&cancel)
            .await;

        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 0);
        assert_eq!(device.requests(), 0);
        assert!(store.is_empty().await);
    }
}
