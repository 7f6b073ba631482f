//! Health check endpoints

use super::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub channels_total: usize,
    pub channels_valid: usize,
}

/// Health endpoint - always returns 200 if process is running
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness endpoint - 200 until shutdown begins
pub async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.gateway.connections();
    let ready = connections.is_accepting();

    let response = ReadyResponse {
        ready,
        channels_total: connections.channel_count(),
        channels_valid: connections.valid_publishers(),
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.gateway.connections();
    crate::metrics::set_publishers(connections.channel_count(), connections.valid_publishers());

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
