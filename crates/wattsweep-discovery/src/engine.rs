//! Discovery and collection engine
//!
//! The engine owns the device registry, the power store and the shutdown
//! token. It drives two independent periodic loops:
//! - discovery, which sweeps the range and replaces the registry
//! - collection, which polls the registry snapshot and refreshes the store
//!
//! The loops only meet at the registry: collection works from whatever
//! snapshot is installed when its cycle starts.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wattsweep_core::{DeviceRecord, PowerStore, StoreError};
use wattsweep_shelly::DeviceClient;

use crate::collector::{CycleReport, MetricsCollector};
use crate::registry::DeviceRegistry;
use crate::scanner::DiscoveryScanner;

/// Shortest period either loop will tick at
const MIN_PERIOD: Duration = Duration::from_millis(100);

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// CIDR range to sweep, e.g. "10.10.10.0/24"
    pub network_range: String,
    /// Time between discovery sweeps
    pub discovery_interval: Duration,
    /// Time between collection cycles
    pub metrics_interval: Duration,
    /// Wait before the first collection cycle, so the first sweep can fill
    /// the registry
    pub collection_start_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network_range: "10.10.10.0/24".to_string(),
            discovery_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(10),
            collection_start_delay: Duration::from_secs(5),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    registry: Arc<DeviceRegistry>,
    store: Arc<PowerStore>,
    scanner: DiscoveryScanner,
    collector: MetricsCollector,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(config: EngineConfig, client: DeviceClient) -> Result<Self, StoreError> {
        let registry = Arc::new(DeviceRegistry::new());
        let store = Arc::new(PowerStore::new()?);
        let scanner = DiscoveryScanner::new(config.network_range.clone(), client.clone(), registry.clone());
        let collector = MetricsCollector::new(client, registry.clone(), store.clone());

        Ok(Self {
            config,
            registry,
            store,
            scanner,
            collector,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<PowerStore> {
        &self.store
    }

    /// Token shared by both loops and every worker they start
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop scheduling new sweeps and cycles. Work already in flight
    /// finishes on its own timeouts.
    pub fn shutdown(&self) {
        info!("Shutting down discovery and collection");
        self.shutdown.cancel();
    }

    /// Run a single discovery sweep
    pub async fn sweep(&self) -> Vec<DeviceRecord> {
        self.scanner.sweep(&self.shutdown).await
    }

    /// Run a single collection cycle
    pub async fn collect(&self) -> CycleReport {
        self.collector.collect(&self.shutdown).await
    }

    /// Sweep now, then every discovery interval until shutdown
    pub async fn run_discovery(&self) {
        info!(
            range = %self.config.network_range,
            interval = ?self.config.discovery_interval,
            "Discovery loop started"
        );
        self.sweep().await;

        let period = self.config.discovery_interval.max(MIN_PERIOD);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        info!("Discovery loop stopped");
    }

    /// Collect after the start delay, then every metrics interval until
    /// shutdown
    pub async fn run_collection(&self) {
        info!(
            interval = ?self.config.metrics_interval,
            delay = ?self.config.collection_start_delay,
            "Collection loop started"
        );

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                info!("Collection loop stopped");
                return;
            }
            _ = tokio::time::sleep(self.config.collection_start_delay) => {}
        }
        self.collect().await;

        let period = self.config.metrics_interval.max(MIN_PERIOD);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.collect().await;
                }
            }
        }
        info!("Collection loop stopped");
    }

    /// Spawn both loops in the background
    pub fn start(self: &Arc<Self>) -> EngineTasks {
        let engine = self.clone();
        let discovery = tokio::spawn(async move { engine.run_discovery().await });

        let engine = self.clone();
        let collection = tokio::spawn(async move { engine.run_collection().await });

        EngineTasks {
            discovery,
            collection,
        }
    }
}

/// Handles of the background loops started by [`Engine::start`]
pub struct EngineTasks {
    discovery: JoinHandle<()>,
    collection: JoinHandle<()>,
}

impl EngineTasks {
    /// Wait for both loops to exit
    pub async fn join(self) {
        if let Err(e) = self.discovery.await {
            error!(error = %e, "Discovery loop failed");
        }
        if let Err(e) = self.collection.await {
            error!(error = %e, "Collection loop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use wattsweep_core::DeviceId;
    use wattsweep_shelly::testing::{free_port, test_client, FakeDevice};

    fn config(range: &str) -> EngineConfig {
        EngineConfig {
            network_range: range.to_string(),
            discovery_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(60),
            collection_start_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_sweep_then_collect() {
        let port = free_port().await.unwrap();
        let _plug = FakeDevice::shelly("SHPLG-S", "A4CF12000002")
            .with_settings(serde_json::json!({"device": {"hostname": "shellyplug-s-000002"}}))
            .with_meters(&[(61.2, true)])
            .spawn(Ipv4Addr::new(127, 0, 0, 2), port)
            .await
            .unwrap();

        let engine = Engine::new(config("127.0.0.0/29"), test_client(port)).unwrap();
        let found = engine.sweep().await;
        assert_eq!(found.len(), 1);

        let report = engine.collect().await;
        assert_eq!((report.attempted, report.succeeded), (1, 1));

        let text = engine.store().export().await.unwrap();
        assert!(text.contains("device_name=\"shellyplug-s-000002\""));
        assert!(text.contains("device_id=\"shplg-s-000002\""));
        assert!(text.contains("ip_address=\"127.0.0.2\""));
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loops() {
        let port = free_port().await.unwrap();
        let engine = Arc::new(
            Engine::new(
                EngineConfig {
                    collection_start_delay: Duration::from_secs(60),
                    ..config("127.0.0.0/30")
                },
                test_client(port),
            )
            .unwrap(),
        );
        let tasks = engine.start();

        // Let the initial sweep run, both loops then wait on their timers
        tokio::time::sleep(Duration::from_millis(300)).await;
        engine.shutdown();

        tokio::time::timeout(Duration::from_secs(2), tasks.join())
            .await
            .expect("loops did not stop after shutdown");
    }

    #[tokio::test]
    async fn test_shutdown_lets_in_flight_cycle_finish() {
        let port = free_port().await.unwrap();
        let _slow = FakeDevice::shelly("SHPLG-S", "A4CF12000002")
            .with_meters(&[(15.0, true)])
            .with_delay(Duration::from_millis(300))
            .spawn(Ipv4Addr::new(127, 0, 0, 2), port)
            .await
            .unwrap();

        let engine = Arc::new(Engine::new(config("127.0.0.0/29"), test_client(port)).unwrap());
        let id = DeviceId::derive("SHPLG-S", "A4CF12000002");
        let device = DeviceRecord::new("127.0.0.2", id.clone(), id.0, "SHPLG-S".to_string());
        engine
            .registry()
            .install(HashMap::from([(device.ip.clone(), device)]))
            .await;

        let collection = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_collection().await })
        };

        // The first cycle is now waiting on the slow device
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.shutdown();

        tokio::time::timeout(Duration::from_secs(3), collection)
            .await
            .expect("collection loop did not stop")
            .unwrap();

        let samples = engine.store().samples().await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].watts, 15.0);
    }

    #[tokio::test]
    async fn test_no_cycles_after_shutdown() {
        let port = free_port().await.unwrap();
        let device = FakeDevice::shelly("SHPLG-S", "A4CF12000002")
            .with_meters(&[(15.0, true)])
            .spawn(Ipv4Addr::new(127, 0, 0, 2), port)
            .await
            .unwrap();

        let engine = Arc::new(Engine::new(config("127.0.0.0/29"), test_client(port)).unwrap());
        engine.shutdown();

        // A loop started after shutdown returns without polling anything
        tokio::time::timeout(Duration::from_secs(2), engine.run_collection())
            .await
            .expect("collection loop did not return");
        assert_eq!(device.requests(), 0);

        // The initial sweep still runs, but its probes decline to start
        tokio::time::timeout(Duration::from_secs(2), engine.run_discovery())
            .await
            .expect("discovery loop did not return");
        assert_eq!(device.requests(), 0);
        assert!(engine.registry().is_empty().await);
    }
}
