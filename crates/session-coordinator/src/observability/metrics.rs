//! Prometheus metrics for the session coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `result`: success, rejected, timeout (auth) or success, error (bootstrap)
//! - `event`: bounded by the dispatch table plus `unknown`
//! - `operation`: bounded by `Store` methods (~6 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sc_store".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("sc_event".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set event latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of live authenticated connections.
///
/// Metric: `sc_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_connections_active").set(count as f64);
}

/// Set the number of rooms with at least one consumer.
///
/// Metric: `sc_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_rooms_active").set(count as f64);
}

/// Set the coordinator mailbox depth.
///
/// Metric: `sc_actor_mailbox_depth`
/// Labels: `actor_type` (coordinator, connection)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record the outcome of a socket authentication attempt.
///
/// Metric: `sc_auth_attempts_total`
/// Labels: `result` (success, rejected, timeout)
pub fn record_auth_attempt(result: &str) {
    counter!("sc_auth_attempts_total", "result" => result.to_string()).increment(1);
}

/// Record one dispatched inbound event.
///
/// Metric: `sc_events_dispatched_total`
/// Labels: `event` (dispatch table tag or `unknown`)
pub fn record_event_dispatched(event: &str) {
    counter!("sc_events_dispatched_total", "event" => event.to_string()).increment(1);
}

/// Record an outbound message dropped because a connection mailbox was full.
///
/// Metric: `sc_messages_dropped_total`
pub fn record_message_dropped() {
    counter!("sc_messages_dropped_total").increment(1);
}

/// Record a bootstrap attempt.
///
/// Metric: `sc_bootstrap_attempts_total`
/// Labels: `result` (success, error)
pub fn record_bootstrap_attempt(result: &str) {
    counter!("sc_bootstrap_attempts_total", "result" => result.to_string()).increment(1);
}

/// Record a failed best-effort durable write.
///
/// Metric: `sc_persistence_failures_total`
/// Labels: `operation`
pub fn record_persistence_failure(operation: &str) {
    counter!("sc_persistence_failures_total", "operation" => operation.to_string())
        .increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Record store operation latency.
///
/// Metric: `sc_store_latency_seconds`
/// Labels: `operation`
pub fn record_store_latency(operation: &str, duration: Duration) {
    histogram!("sc_store_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Record inbound event handling latency.
///
/// Metric: `sc_event_latency_seconds`
/// Labels: `event`
pub fn record_event_latency(event: &str, duration: Duration) {
    histogram!("sc_event_latency_seconds", "event" => event.to_string())
        .record(duration.as_secs_f64());
}
