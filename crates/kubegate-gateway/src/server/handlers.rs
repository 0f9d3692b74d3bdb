//! Plain HTTP endpoints: liveness, readiness, and metrics.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use kubegate_store::SessionStore;

use crate::metrics::GatewayMetrics;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub metrics: Arc<GatewayMetrics>,
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "kubegate",
    }))
}

/// Readiness probe; degrades to 503 when a dependency misbehaves.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let sessions_ok = state.sessions.count().await.is_ok();
    let all_ready = sessions_ok;

    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if all_ready { "ready" } else { "not_ready" },
            "checks": {
                "server": true,
                "session_store": sessions_ok,
            },
        })),
    )
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
