//! Prometheus Metrics Module
//!
//! Counters and gauges for the stream and the delivery layer.
//!
//! # Metrics Categories
//!
//! - **Stream**: messages received by event kind, reconnects, auth failures
//! - **Delivery**: per-sink deliveries, retries, drops, latency
//! - **Backpressure**: per-sink queue depth
//!
//! # Integration
//!
//! When a port is configured, the exporter serves `/metrics` on its own HTTP
//! listener. Without one no recorder is installed and every macro below is
//! a no-op.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder and start its HTTP listener.
///
/// Must be called from inside a Tokio runtime. Calling it again is a no-op.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder or listener cannot be installed.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    let _ = INSTALLED.set(addr);
    register_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "woostream_messages_received_total",
        "Frames received from the private stream, by classified kind"
    );
    describe_counter!(
        "woostream_reconnects_total",
        "Connection cycles that ended and were retried"
    );
    describe_counter!(
        "woostream_auth_failures_total",
        "Authentication rejections from the exchange"
    );

    describe_counter!(
        "woostream_deliveries_total",
        "Messages delivered successfully, by sink"
    );
    describe_counter!(
        "woostream_delivery_retries_total",
        "Delivery attempts retried after a transient failure, by sink"
    );
    describe_counter!(
        "woostream_deliveries_dropped_total",
        "Messages given up on, by sink"
    );

    describe_gauge!(
        "woostream_sink_queue_depth",
        "Messages waiting in a sink's queue"
    );

    describe_histogram!(
        "woostream_delivery_latency_seconds",
        "Time from enqueue to successful delivery, by sink"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a classified inbound frame.
pub fn record_message_received(kind: &'static str) {
    counter!("woostream_messages_received_total", "kind" => kind).increment(1);
}

/// Record a reconnect cycle.
pub fn record_reconnect() {
    counter!("woostream_reconnects_total").increment(1);
}

/// Record an authentication rejection.
pub fn record_auth_failure() {
    counter!("woostream_auth_failures_total").increment(1);
}

/// Record a successful delivery and its end-to-end latency.
pub fn record_delivery(sink: &'static str, latency: Duration) {
    counter!("woostream_deliveries_total", "sink" => sink).increment(1);
    histogram!("woostream_delivery_latency_seconds", "sink" => sink)
        .record(latency.as_secs_f64());
}

/// Record a retried delivery attempt.
pub fn record_delivery_retry(sink: &'static str) {
    counter!("woostream_delivery_retries_total", "sink" => sink).increment(1);
}

/// Record messages a sink gave up on.
pub fn record_deliveries_dropped(sink: &'static str, count: u64) {
    counter!("woostream_deliveries_dropped_total", "sink" => sink).increment(count);
}

/// Update a sink's queue depth.
pub fn set_queue_depth(sink: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("woostream_sink_queue_depth", "sink" => sink).set(depth as f64);
}

// =============================================================================
// Tests
// =============================================================================
