//! wattsweep discovery - finding devices and collecting their readings
//!
//! This crate provides:
//! - Concurrent probing of every address in a CIDR range
//! - The device registry, replaced wholesale after each sweep
//! - Concurrent power collection into the metrics store
//! - The engine running both on independent timers with shared shutdown

pub mod collector;
pub mod engine;
pub mod probe;
pub mod registry;
pub mod scanner;

pub use collector::{CycleReport, MetricsCollector};
pub use engine::{Engine, EngineConfig, EngineTasks};
pub use registry::{DeviceRegistry, Snapshot};
pub use scanner::DiscoveryScanner;
