// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the tree engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `mptree_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: add_root, add_child, move, delete, ...
//! - `backend`: memory, sql
//! - `status`: success, error

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record a completed tree operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "mptree_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "mptree_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record how many rows a move or sibling shift rewrote
pub fn record_subtree_rewrite(rows: usize) {
    histogram!("mptree_subtree_rewrite_rows").record(rows as f64);
}

/// Record nodes placed by a rebuild
pub fn record_rebuild(placed: u64, skipped: usize) {
    counter!("mptree_rebuild_nodes_total").increment(placed);
    counter!("mptree_rebuild_skipped_total").increment(skipped as u64);
}

/// Record a retried operation (conflict or connection)
pub fn record_retry(operation: &str) {
    counter!(
        "mptree_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a backend call outcome
pub fn record_store_operation(backend: &str, operation: &str, status: &str) {
    counter!(
        "mptree_store_operations_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Drop guard that records latency and a success/error count.
///
/// Starts pessimistic: an early `?` return counts as an error unless
/// [`LatencyTimer::succeed`] ran first.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
    succeeded: bool,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
            succeeded: false,
        }
    }

    /// Mark the operation successful and pass its value through.
    pub fn succeed<T>(&mut self, value: T) -> T {
        self.succeeded = true;
        value
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
        record_operation(self.operation, if self.succeeded { "success" } else { "error" });
    }
}
