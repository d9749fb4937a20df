//! Registry of devices known from the latest discovery sweep

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::RwLock;
use wattsweep_core::DeviceRecord;

/// Devices keyed by address, as installed by one sweep. Never mutated.
pub type Snapshot = Arc<HashMap<String, DeviceRecord>>;

/// Holds the live snapshot. Installation swaps the whole map, so readers
/// see either the previous sweep or the new one, never a mix.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    current: RwLock<Snapshot>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live snapshot with the result of a sweep
    pub async fn install(&self, devices: HashMap<String, DeviceRecord>) {
        let snapshot = Arc::new(devices);
        *self.current.write().await = snapshot;
    }

    /// The live snapshot. Later installs do not affect the returned value.
    pub async fn snapshot(&self) -> Snapshot {
        self.current.read().await.clone()
    }

    /// Copy of all devices, ordered by address
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        let snapshot = self.snapshot().await;
        let mut devices: Vec<DeviceRecord> = snapshot.values().cloned().collect();
        sort_by_address(&mut devices);
        devices
    }

    pub async fn get(&self, ip: &str) -> Option<DeviceRecord> {
        self.current.read().await.get(ip).cloned()
    }

    pub async fn len(&self) -> usize {
        self.current.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Sort numerically by IPv4 address, unparsable addresses last
pub fn sort_by_address(devices: &mut [DeviceRecord]) {
    devices.sort_by_key(|d| {
        (
            d.ip.parse::<Ipv4Addr>().map_or(u64::MAX, |ip| u64::from(u32::from(ip))),
            d.ip.clone(),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use wattsweep_core::DeviceId;

    fn record(ip: &str, mac: &str) -> DeviceRecord {
        let id = DeviceId::derive("SHPLG-S", mac);
        DeviceRecord::new(ip, id.clone(), id.0, "SHPLG-S".to_string())
    }

    fn map(records: &[DeviceRecord]) -> HashMap<String, DeviceRecord> {
        records.iter().map(|r| (r.ip.clone(), r.clone())).collect()
    }

    #[tokio::test]
    async fn test_install_replaces_wholesale() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty().await);

        registry
            .install(map(&[record("10.0.0.2", "000001"), record("10.0.0.3", "000002")]))
            .await;
        assert_eq!(registry.len().await, 2);

        registry.install(map(&[record("10.0.0.4", "000003")])).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("10.0.0.2").await.is_none());
        assert_eq!(
            registry.get("10.0.0.4").await.unwrap().id.as_str(),
            "shplg-s-000003"
        );
    }

    #[tokio::test]
    async fn test_snapshot_is_point_in_time() {
        let registry = DeviceRegistry::new();
        registry.install(map(&[record("10.0.0.2", "000001")])).await;

        let before = registry.snapshot().await;
        registry.install(HashMap::new()).await;

        assert_eq!(before.len(), 1);
        assert!(before.contains_key("10.0.0.2"));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_devices_sorted_numerically() {
        let registry = DeviceRegistry::new();
        registry
            .install(map(&[
                record("10.0.0.10", "000001"),
                record("10.0.0.9", "000002"),
                record("10.0.0.100", "000003"),
            ]))
            .await;

        let ips: Vec<String> = registry.devices().await.into_iter().map(|d| d.ip).collect();
        assert_eq!(ips, vec!["10.0.0.9", "10.0.0.10", "10.0.0.100"]);
    }
}
