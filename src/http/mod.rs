//! HTTP front-end
//!
//! One publish endpoint plus health, readiness and metrics.

mod health;
mod publish;

pub use health::{HealthResponse, ReadyResponse};
pub use publish::RemoteAddr;

use crate::gateway::Gateway;
use crate::metrics::GatewayMetrics;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Publish endpoint path
pub const PUBLISH_PATH: &str = "/server/logger/log/post";

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub metrics: Arc<GatewayMetrics>,
}

/// Create the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            PUBLISH_PATH,
            post(publish::publish_handler)
                .get(publish::method_disabled)
                .put(publish::method_disabled)
                .delete(publish::method_disabled),
        )
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .route("/metrics", get(health::metrics_handler))
        .fallback(publish::fallback)
        .with_state(state)
}
