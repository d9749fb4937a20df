//! wattsweep core - device types, address ranges, and the metrics store
//!
//! This crate provides the foundational types for wattsweep:
//! - Device records and the stable device id derivation
//! - CIDR address range parsing and host enumeration
//! - The latest-value power metrics store exported to Prometheus

pub mod device;
pub mod range;
pub mod store;

pub use device::{DeviceId, DeviceRecord, Sample, SampleLabels};
pub use range::{enumerate_hosts, AddressRange, RangeError};
pub use store::{PowerStore, StoreError, LABEL_NAMES, POWER_METRIC};
