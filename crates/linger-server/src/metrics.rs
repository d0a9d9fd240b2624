//! Metrics collection and export for Linger.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Metric names.
pub mod names {
    pub const HELD_ACTIVE: &str = "linger_held_requests_active";
    pub const REGISTRATIONS_TOTAL: &str = "linger_registrations_total";
    pub const PUBLISHES_TOTAL: &str = "linger_publishes_total";
    pub const DELIVERIES_TOTAL: &str = "linger_deliveries_total";
    pub const HOLD_SECONDS: &str = "linger_hold_seconds";
    pub const CHANNELS_ACTIVE: &str = "linger_channels_active";
    pub const ERRORS_TOTAL: &str = "linger_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_gauge!(
        names::HELD_ACTIVE,
        "Current number of requests held open"
    );
    metrics::describe_counter!(
        names::REGISTRATIONS_TOTAL,
        "Total number of long-poll registrations"
    );
    metrics::describe_counter!(names::PUBLISHES_TOTAL, "Total number of publish calls");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total number of payloads delivered to held requests"
    );
    metrics::describe_histogram!(
        names::HOLD_SECONDS,
        "Time a request was held before it completed"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of channels");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a registration (`broadcast` or `subscriber`).
pub fn record_registration(kind: &'static str) {
    counter!(names::REGISTRATIONS_TOTAL, "kind" => kind).increment(1);
}

/// Record a publish and how many held requests it completed.
pub fn record_publish(target: &'static str, delivered: usize) {
    counter!(names::PUBLISHES_TOTAL, "target" => target).increment(1);
    counter!(names::DELIVERIES_TOTAL, "target" => target).increment(delivered as u64);
}

/// Record how long a request was held, by outcome.
pub fn record_hold(elapsed: Duration, outcome: &'static str) {
    histogram!(names::HOLD_SECONDS, "outcome" => outcome).record(elapsed.as_secs_f64());
}

/// Update channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard tracking a held request for as long as it lives.
pub struct HeldRequestGuard;

impl HeldRequestGuard {
    /// Create a new metrics guard, recording a held request.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::HELD_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for HeldRequestGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HeldRequestGuard {
    fn drop(&mut self) {
        gauge!(names::HELD_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic
        let _guard = HeldRequestGuard::new();
        record_publish("broadcast", 3);
        record_hold(Duration::from_millis(5), "delivered");
    }
}
