//! Application state management

use anyhow::{Context, Result};
use std::sync::Arc;
use wattsweep_discovery::Engine;
use wattsweep_shelly::DeviceClient;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Discovery and collection engine
    pub engine: Arc<Engine>,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let client = DeviceClient::new(config.client_config()).context("Failed to create device client")?;
        let engine = Engine::new(config.engine_config()?, client).context("Failed to create metrics store")?;

        Ok(Arc::new(Self {
            engine: Arc::new(engine),
            config,
        }))
    }
}
