//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Remote calls**: calls by operation and outcome, in-flight gauge
//! - **Handles**: tracked handles, handles lost to failed heartbeats
//! - **Stream**: events received, malformed messages, reconnects, connection state
//! - **Pipeline**: flushes, flushed events, tracked series, end-to-end latency
//!
//! Metrics are exposed at `/metrics` on the health server port. Until
//! [`init_metrics`] runs, every recording function is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "frame_ingest_remote_calls_total",
        "Remote engine calls by operation and outcome"
    );
    describe_gauge!(
        "frame_ingest_calls_in_flight",
        "Remote engine calls currently holding a slot"
    );

    describe_gauge!(
        "frame_ingest_active_handles",
        "Handles created and not yet released"
    );
    describe_counter!(
        "frame_ingest_handles_lost_total",
        "Handles dropped from tracking after a failed heartbeat"
    );

    describe_counter!(
        "frame_ingest_events_received_total",
        "Events forwarded from the event source"
    );
    describe_counter!(
        "frame_ingest_malformed_messages_total",
        "Inbound messages skipped because they did not decode"
    );
    describe_counter!(
        "frame_ingest_reconnects_total",
        "Event source reconnection attempts"
    );
    describe_gauge!(
        "frame_ingest_stream_connected",
        "1 while the event source is connected"
    );

    describe_counter!(
        "frame_ingest_flushes_total",
        "Batch flushes by outcome"
    );
    describe_counter!(
        "frame_ingest_flushed_events_total",
        "Events persisted by successful flushes"
    );
    describe_gauge!("frame_ingest_series", "Per-symbol windows tracked");
    describe_histogram!(
        "frame_ingest_end_to_end_latency_seconds",
        "Delay between an event's timestamp and its ingestion"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn outcome(ok: bool) -> &'static str {
    if ok { "ok" } else { "error" }
}

/// Record a finished remote call.
pub fn record_remote_call(operation: &'static str, ok: bool) {
    counter!(
        "frame_ingest_remote_calls_total",
        "operation" => operation,
        "outcome" => outcome(ok)
    )
    .increment(1);
}

/// Update the in-flight call gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_in_flight(count: usize) {
    gauge!("frame_ingest_calls_in_flight").set(count as f64);
}

/// Update the tracked handle gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_handles(count: usize) {
    gauge!("frame_ingest_active_handles").set(count as f64);
}

/// Record a handle lost to a failed heartbeat.
pub fn record_handle_lost() {
    counter!("frame_ingest_handles_lost_total").increment(1);
}

/// Record an event forwarded to the pipeline.
pub fn record_event_received() {
    counter!("frame_ingest_events_received_total").increment(1);
}

/// Record a skipped malformed message.
pub fn record_malformed_message() {
    counter!("frame_ingest_malformed_messages_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("frame_ingest_reconnects_total").increment(1);
}

/// Update the stream connection gauge.
pub fn set_stream_connected(connected: bool) {
    gauge!("frame_ingest_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a flush attempt of `events` events.
pub fn record_flush(events: usize, ok: bool) {
    counter!("frame_ingest_flushes_total", "outcome" => outcome(ok)).increment(1);
    if ok {
        counter!("frame_ingest_flushed_events_total").increment(events as u64);
    }
}

/// Update the tracked series gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_series(count: usize) {
    gauge!("frame_ingest_series").set(count as f64);
}

/// Record a sampled end-to-end latency. Negative values (clock skew) are
/// recorded as zero.
#[allow(clippy::cast_precision_loss)]
pub fn record_latency_ms(latency_ms: i64) {
    histogram!("frame_ingest_end_to_end_latency_seconds").record(latency_ms.max(0) as f64 / 1000.0);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome(true), "ok");
        assert_eq!(outcome(false), "error");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_remote_call("read", true);
        set_in_flight(3);
        record_flush(10, false);
        record_latency_ms(-5);
    }
}
