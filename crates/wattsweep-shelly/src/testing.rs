//! In-process fake devices for tests
//!
//! Every fake binds its own loopback address (`127.0.0.N`) on a shared port,
//! so a single [`DeviceClient`] can reach several of them the way it reaches
//! devices on a real subnet.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use axum::http::StatusCode;

use crate::query::{ClientConfig, DeviceClient, DEFAULT_IDENTIFY_PATH, SETTINGS_PATH, STATUS_PATH};

type Reply = Option<(StatusCode, String)>;

/// Canned responses for one fake device. Unset endpoints answer 404.
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    identify: Reply,
    settings: Reply,
    status: Reply,
    delay: Duration,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that identifies with the given type and MAC
    pub fn shelly(device_type: &str, mac: &str) -> Self {
        Self::new().with_identify(json!({
            "type": device_type,
            "mac": mac,
            "auth": false,
            "fw": "20230913-114008/v1.14.0-gcb84623",
            "num_outputs": 1,
            "num_meters": 1
        }))
    }

    pub fn with_identify(mut self, body: Value) -> Self {
        self.identify = Some((StatusCode::OK, body.to_string()));
        self
    }

    pub fn with_identify_body(mut self, status: StatusCode, body: &str) -> Self {
        self.identify = Some((status, body.to_string()));
        self
    }

    pub fn with_settings(mut self, body: Value) -> Self {
        self.settings = Some((StatusCode::OK, body.to_string()));
        self
    }

    pub fn with_settings_body(mut self, status: StatusCode, body: &str) -> Self {
        self.settings = Some((status, body.to_string()));
        self
    }

    pub fn with_status(mut self, body: Value) -> Self {
        self.status = Some((StatusCode::OK, body.to_string()));
        self
    }

    pub fn with_status_body(mut self, status: StatusCode, body: &str) -> Self {
        self.status = Some((status, body.to_string()));
        self
    }

    /// Status with one meter per `(power, is_valid)` pair
    pub fn with_meters(self, meters: &[(f64, bool)]) -> Self {
        let meters: Vec<Value> = meters
            .iter()
            .map(|(power, valid)| {
                json!({"power": power, "is_valid": valid, "timestamp": 0, "counters": [0.0, 0.0, 0.0]})
            })
            .collect();
        self.with_status(json!({"meters": meters, "relays": [{"ison": true}]}))
    }

    /// Delay every response, to hold requests in flight
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Serve this device on `ip:port` until the handle is dropped
    pub async fn spawn(self, ip: Ipv4Addr, port: u16) -> std::io::Result<FakeDeviceHandle> {
        let listener = TcpListener::bind(SocketAddr::from((ip, port))).await?;
        let state = Arc::new(FakeState {
            device: self,
            requests: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route(DEFAULT_IDENTIFY_PATH, get(identify))
            .route(SETTINGS_PATH, get(settings))
            .route(STATUS_PATH, get(status))
            .with_state(state.clone());

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(FakeDeviceHandle { state, task })
    }
}

struct FakeState {
    device: FakeDevice,
    requests: AtomicUsize,
}

impl FakeState {
    async fn reply(&self, reply: &Reply) -> Response {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.device.delay.is_zero() {
            tokio::time::sleep(self.device.delay).await;
        }
        match reply {
            Some((status, body)) => (
                *status,
                [(header::CONTENT_TYPE, "application/json")],
                body.clone(),
            )
                .into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

async fn identify(State(state): State<Arc<FakeState>>) -> Response {
    state.reply(&state.device.identify).await
}

async fn settings(State(state): State<Arc<FakeState>>) -> Response {
    state.reply(&state.device.settings).await
}

async fn status(State(state): State<Arc<FakeState>>) -> Response {
    state.reply(&state.device.status).await
}

/// A running fake device; stops serving when dropped
pub struct FakeDeviceHandle {
    state: Arc<FakeState>,
    task: JoinHandle<()>,
}

impl FakeDeviceHandle {
    /// Requests received so far, on any endpoint
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDeviceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Pick a port that is currently free on loopback
pub async fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    Ok(listener.local_addr()?.port())
}

/// Client aimed at fake devices on `port`, with short timeouts
pub fn test_client(port: u16) -> DeviceClient {
    DeviceClient::new(ClientConfig {
        port,
        identify_path: DEFAULT_IDENTIFY_PATH.to_string(),
        probe_timeout: Duration::from_millis(500),
        status_timeout: Duration::from_millis(1000),
    })
    .expect("failed to build test client")
}
