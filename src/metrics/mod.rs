//! Prometheus metrics module
//!
//! The recorder is installed once per process; the recording helpers below
//! are no-ops until it is.

use crate::error::GatewayError;
use metrics::{counter, gauge, histogram, describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

static HANDLE: OnceLock<Arc<PrometheusHandle>> = OnceLock::new();
static INSTALL: Mutex<()> = Mutex::new(());

/// Gateway metrics collector
#[derive(Clone)]
pub struct GatewayMetrics {
    handle: Arc<PrometheusHandle>,
}

impl GatewayMetrics {
    /// Install the Prometheus recorder (first call only) and return a handle
    pub fn new() -> Result<Self, GatewayError> {
        let _guard = INSTALL.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = HANDLE.get() {
            return Ok(Self {
                handle: Arc::clone(handle),
            });
        }

        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| GatewayError::ConfigInvalid(format!("could not install metrics recorder: {e}")))?;

        Self::register_metrics();

        let handle = HANDLE.get_or_init(|| Arc::new(handle));
        Ok(Self {
            handle: Arc::clone(handle),
        })
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "gateway_requests_total",
            Unit::Count,
            "Publish requests received, by result"
        );
        describe_counter!(
            "gateway_publish_attempts_total",
            Unit::Count,
            "Individual publish attempts, including retries"
        );
        describe_counter!(
            "gateway_publish_total",
            Unit::Count,
            "Completed publish calls, by result"
        );
        describe_counter!(
            "gateway_connect_attempts_total",
            Unit::Count,
            "Channel publisher connect attempts"
        );
        describe_counter!(
            "gateway_errors_total",
            Unit::Count,
            "Total gateway errors, by error_type"
        );

        describe_histogram!(
            "gateway_publish_duration_seconds",
            Unit::Seconds,
            "Time spent in a publish call including retries"
        );

        describe_gauge!(
            "gateway_channel_publishers",
            Unit::Count,
            "Channels present in the connection table"
        );
        describe_gauge!(
            "gateway_channel_publishers_valid",
            Unit::Count,
            "Channels whose current publisher is valid"
        );
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Record an inbound request and how it ended (`ok`, `failed`, or an error label)
pub fn record_request(result: &'static str) {
    counter!("gateway_requests_total", "result" => result).increment(1);
}

/// Record one publish attempt
pub fn record_publish_attempt() {
    counter!("gateway_publish_attempts_total").increment(1);
}

/// Record a completed publish call
pub fn record_publish(success: bool, duration: Duration) {
    let result = if success { "success" } else { "failure" };

    counter!("gateway_publish_total", "result" => result).increment(1);
    histogram!("gateway_publish_duration_seconds", "result" => result)
        .record(duration.as_secs_f64());
}

/// Record one connect attempt
pub fn record_connect_attempt() {
    counter!("gateway_connect_attempts_total").increment(1);
}

/// Record a gateway error under its type label
pub fn record_error(err: &GatewayError) {
    counter!("gateway_errors_total", "error_type" => err.error_type_label()).increment(1);
}

/// Set connection table gauges
pub fn set_publishers(total: usize, valid: usize) {
    gauge!("gateway_channel_publishers").set(total as f64);
    gauge!("gateway_channel_publishers_valid").set(valid as f64);
}
