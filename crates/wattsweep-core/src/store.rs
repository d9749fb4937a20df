//! Latest-value power metrics store
//!
//! The store keeps one gauge value per [`SampleLabels`] tuple inside its own
//! Prometheus registry. Writers (the collector) take the write lock only for
//! the in-memory update; readers (the `/metrics` handler) take the read lock
//! to gather, so an export never sees a half-written device.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::device::{Sample, SampleLabels};

/// Exported gauge name
pub const POWER_METRIC: &str = "shelly_power_watts";

/// Label names, in the order of [`SampleLabels::values`]
pub const LABEL_NAMES: [&str; 4] = ["device_id", "device_name", "device_type", "ip_address"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("Exported metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

struct StoreInner {
    registry: Registry,
    power: GaugeVec,
}

/// Concurrency-safe table of the latest power reading per device
pub struct PowerStore {
    inner: RwLock<StoreInner>,
}

impl PowerStore {
    pub fn new() -> Result<Self, StoreError> {
        let registry = Registry::new();
        let power = GaugeVec::new(
            Opts::new(
                POWER_METRIC,
                "Current power consumption in watts from Shelly devices",
            ),
            &LABEL_NAMES,
        )?;
        registry.register(Box::new(power.clone()))?;

        Ok(Self {
            inner: RwLock::new(StoreInner { registry, power }),
        })
    }

    /// Set the value for a label tuple, replacing any previous value
    pub async fn set(&self, labels: &SampleLabels, watts: f64) {
        let inner = self.inner.write().await;
        inner.power.with_label_values(&labels.values()).set(watts);
    }

    /// Write several readings for one label tuple in a single critical
    /// section; the last reading wins.
    pub async fn set_all<I>(&self, labels: &SampleLabels, readings: I)
    where
        I: IntoIterator<Item = f64>,
    {
        let inner = self.inner.write().await;
        let values = labels.values();
        for watts in readings {
            inner.power.with_label_values(&values).set(watts);
        }
    }

    /// Drop every stored value
    pub async fn clear(&self) {
        let inner = self.inner.write().await;
        inner.power.reset();
    }

    /// Encode the current content in the Prometheus text exposition format
    pub async fn export(&self) -> Result<String, StoreError> {
        let families = {
            let inner = self.inner.read().await;
            inner.registry.gather()
        };

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Content type of [`PowerStore::export`]
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Point-in-time copy of every stored sample, in no particular order
    pub async fn samples(&self) -> Vec<Sample> {
        let families = {
            let inner = self.inner.read().await;
            inner.registry.gather()
        };

        let mut samples = Vec::new();
        for family in families.iter().filter(|f| f.get_name() == POWER_METRIC) {
            for metric in family.get_metric() {
                let label = |name: &str| {
                    metric
                        .get_label()
                        .iter()
                        .find(|pair| pair.get_name() == name)
                        .map(|pair| pair.get_value().to_string())
                        .unwrap_or_default()
                };
                samples.push(Sample {
                    labels: SampleLabels {
                        device_id: label("device_id"),
                        device_name: label("device_name"),
                        device_type: label("device_type"),
                        ip_address: label("ip_address"),
                    },
                    watts: metric.get_gauge().get_value(),
                });
            }
        }
        samples
    }

    /// Number of label tuples currently holding a value
    pub async fn len(&self) -> usize {
        self.samples().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
