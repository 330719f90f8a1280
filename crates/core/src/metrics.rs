//! Metrics definitions for the indexer.
//!
//! Metrics are collected using the `metrics` crate and exported to
//! Prometheus by the binary via `metrics-exporter-prometheus`. Every
//! series carries a `network` label so that networks can be told apart.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "blocks_scanned_total",
        "Total number of blocks scanned and persisted"
    );
    describe_counter!(
        "transactions_stored_total",
        "Total number of transactions newly stored"
    );
    describe_counter!(
        "decode_errors_total",
        "Total number of call arguments kept as raw bytes after a failed decode"
    );
    describe_counter!(
        "orphan_events_total",
        "Total number of events dropped because their extrinsic was missing"
    );
    describe_counter!(
        "scan_failures_total",
        "Total number of scan attempts that ended in an error"
    );
    describe_counter!(
        "network_restarts_total",
        "Total number of wipe-and-restart cycles"
    );
    describe_histogram!(
        "block_processing_duration_seconds",
        "Time taken to fetch, decode and persist a block in seconds"
    );
    describe_gauge!(
        "network_cursor_height",
        "Last block height scanned for a network"
    );
}

/// Record a successfully scanned block and the new cursor height.
pub fn record_block_scanned(network: &str, height: u64) {
    counter!("blocks_scanned_total", "network" => network.to_string()).increment(1);
    gauge!("network_cursor_height", "network" => network.to_string()).set(height as f64);
}

/// Record newly inserted transactions (conflicting inserts are not counted).
pub fn record_transactions_stored(network: &str, count: u64) {
    counter!("transactions_stored_total", "network" => network.to_string()).increment(count);
}

/// Record a decode error.
///
/// # Arguments
/// * `error_type` - What failed to decode ("call", "event", "extrinsic")
/// * `network` - The network name, or "unknown"
pub fn record_decode_error(error_type: &str, network: &str) {
    counter!("decode_errors_total", "type" => error_type.to_string(), "network" => network.to_string())
        .increment(1);
}

/// Record an event whose `ApplyExtrinsic` index had no matching extrinsic.
pub fn record_orphan_event(network: &str) {
    counter!("orphan_events_total", "network" => network.to_string()).increment(1);
}

/// Record a failed scan attempt.
pub fn record_scan_failure(network: &str) {
    counter!("scan_failures_total", "network" => network.to_string()).increment(1);
}

/// Record a wipe-and-restart cycle.
pub fn record_network_restart(network: &str) {
    counter!("network_restarts_total", "network" => network.to_string()).increment(1);
}

/// Record block processing duration.
pub fn record_block_processing_duration(network: &str, duration_secs: f64) {
    histogram!("block_processing_duration_seconds", "network" => network.to_string())
        .record(duration_secs);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    network: String,
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer for a network.
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_block_processing_duration(&self.network, duration);
    }
}
