//! Metrics collection.
//!
//! # Responsibilities
//! - Define tunnel connection metrics (streams, errors, heartbeats, terminations)
//! - Track per-connection aggregates labelled by `conn_index`
//!
//! # Metrics
//! - `tunnel_streams_total` (counter): streams by kind, provenance, status
//! - `tunnel_stream_errors_total` (counter): failed streams by kind and error
//! - `tunnel_stream_duration_seconds` (histogram): time from accept to completion
//! - `tunnel_active_streams` (gauge): in-flight stream tasks
//! - `tunnel_heartbeat_missed` (gauge): current consecutive missed probes
//! - `tunnel_connection_terminations_total` (counter): connection ends by reason

use metrics::{counter, gauge, histogram};

use crate::stream::StreamOutcome;

/// Record a finished stream.
pub fn record_stream(conn_index: u8, outcome: &StreamOutcome) {
    let conn_index = conn_index.to_string();
    let kind = outcome.kind.as_str();

    counter!(
        "tunnel_streams_total",
        "conn_index" => conn_index.clone(),
        "kind" => kind,
        "provenance" => outcome.provenance.as_str(),
        "status" => outcome.status.as_str().to_string()
    )
    .increment(1);

    histogram!(
        "tunnel_stream_duration_seconds",
        "conn_index" => conn_index.clone(),
        "kind" => kind
    )
    .record(outcome.elapsed.as_secs_f64());

    if let Some(error) = &outcome.error {
        counter!(
            "tunnel_stream_errors_total",
            "conn_index" => conn_index,
            "kind" => kind,
            "error" => error.kind()
        )
        .increment(1);
    }
}

/// Record a stream task that panicked before producing an outcome.
pub fn record_stream_panic(conn_index: u8) {
    counter!(
        "tunnel_stream_errors_total",
        "conn_index" => conn_index.to_string(),
        "kind" => "unknown",
        "error" => "panic"
    )
    .increment(1);
}

/// Update the in-flight stream gauge.
pub fn record_active_streams(conn_index: u8, active: usize) {
    gauge!("tunnel_active_streams", "conn_index" => conn_index.to_string()).set(active as f64);
}

/// Update the consecutive missed heartbeat gauge.
pub fn record_heartbeat_missed(conn_index: u8, missed: u64) {
    gauge!("tunnel_heartbeat_missed", "conn_index" => conn_index.to_string()).set(missed as f64);
}

/// Record why a connection ended.
pub fn record_connection_terminated(conn_index: u8, reason: &'static str) {
    counter!(
        "tunnel_connection_terminations_total",
        "conn_index" => conn_index.to_string(),
        "reason" => reason
    )
    .increment(1);
}
