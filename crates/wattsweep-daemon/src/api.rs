//! HTTP handlers

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.engine.store();
    match store.export().await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, store.content_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to export metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(format!("Failed to export metrics: {}", e))),
            )
                .into_response()
        }
    }
}

/// Informational landing page
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    let config = state.engine.config();
    Html(format!(
        r#"<html>
<head><title>wattsweep</title></head>
<body>
<h1>wattsweep</h1>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/api/devices">Known devices</a></p>
<p>Network range: {}</p>
<p>Device discovery interval: {}</p>
<p>Metrics collection interval: {}</p>
<p>Device port: {}</p>
</body>
</html>
"#,
        escape_html(&config.network_range),
        humantime::format_duration(config.discovery_interval),
        humantime::format_duration(config.metrics_interval),
        state.config.device.port,
    ))
}

/// List devices from the latest discovery sweep
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.registry().devices().await)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
        assert_eq!(escape_html("10.10.10.0/24"), "10.10.10.0/24");
    }
}
