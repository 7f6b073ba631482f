//! Publish Gateway binary
//!
//! Startup is all-or-nothing: configuration, security context and broker
//! context must all be valid before the HTTP listener opens.

use anyhow::Result;
use publish_gateway::broker;
use publish_gateway::http::{self, AppState};
use publish_gateway::metrics::GatewayMetrics;
use publish_gateway::{ConnectionManager, Gateway, GatewayConfig, SecurityContext};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let gateway_config = GatewayConfig::from_env()?;

    // Initialize tracing with configured log level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("publish_gateway={}", gateway_config.log_level).parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        connect_limit = gateway_config.connect_limit,
        publish_limit = gateway_config.publish_limit,
        "Starting Publish Gateway"
    );

    let metrics = Arc::new(GatewayMetrics::new()?);
    info!("Prometheus metrics initialized");

    let security = match SecurityContext::load(&gateway_config).await {
        Ok(security) => Arc::new(security),
        Err(e) => {
            error!(error = %e, "Security is not valid");
            return Err(e.into());
        }
    };
    info!("Security is valid");

    let broker = broker::from_context(&gateway_config.broker_lookup_context);
    let connections = Arc::new(ConnectionManager::from_config(&gateway_config, broker));

    if let Err(e) = connections.init().await {
        error!(error = %e, "Connection is not valid");
        return Err(e.into());
    }
    info!("Connection is valid");

    let gateway = Arc::new(Gateway::new(security, Arc::clone(&connections)));

    let app_state = AppState {
        gateway,
        metrics: Arc::clone(&metrics),
    };

    let router = http::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], gateway_config.http_port).into();

    info!(port = gateway_config.http_port, "Starting HTTP server");

    let result = axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let connections = Arc::clone(&connections);
        async move {
            shutdown_signal().await;
            connections.begin_shutdown();
        }
    })
    .await;

    if let Err(ref e) = result {
        error!(error = %e, "HTTP server error");
    }

    // Graceful shutdown
    info!("Shutting down gateway...");
    connections.shutdown().await;

    info!("Gateway shutdown complete");
    result.map_err(Into::into)
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
