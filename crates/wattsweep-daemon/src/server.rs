//! Web server setup and routing

use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use wattsweep_discovery::Engine;

use crate::api;
use crate::state::AppState;

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/metrics", get(api::metrics))
        .route("/api/devices", get(api::list_devices))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start discovery and collection, then serve until Ctrl-C
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let tasks = state.engine.start();
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    info!("Metrics endpoint: http://{}/metrics", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.engine.clone()))
        .await?;

    // Loops stop scheduling right away; wait for in-flight cycles
    tasks.join().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(engine: Arc<Engine>) {
    let token = engine.shutdown_token();
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl-C");
                token.cancelled().await;
            }
        },
        _ = token.cancelled() => {}
    }
    engine.shutdown();
}
