// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for list-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing a recorder.
//!
//! # Metric Naming Convention
//! - `list_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `backend`: local, cloud
//! - `operation`: save_entry, update_collection, load_all, ...
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a coordinator operation outcome
pub fn record_operation(backend: &str, operation: &str, status: &str) {
    counter!(
        "list_sync_operations_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(backend: &str, operation: &str, duration: Duration) {
    histogram!(
        "list_sync_operation_seconds",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an error with category for alerting
pub fn record_error(backend: &str, operation: &str, error_type: &str) {
    counter!(
        "list_sync_errors_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a post-write read-back miss
pub fn record_verification_failure(backend: &str, kind: &str) {
    counter!(
        "list_sync_verification_failures_total",
        "backend" => backend.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a bulk rollback and how many compensating deletes failed
pub fn record_rollback(backend: &str, rolled_back: usize, failed: usize) {
    counter!("list_sync_rollbacks_total", "backend" => backend.to_string()).increment(1);
    counter!("list_sync_rollback_items_total", "backend" => backend.to_string())
        .increment(rolled_back as u64);
    if failed > 0 {
        counter!("list_sync_rollback_failures_total", "backend" => backend.to_string())
            .increment(failed as u64);
    }
}

/// Set backend health status (1 = healthy, 0 = degraded)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "list_sync_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Record a mode state-machine transition
pub fn record_mode_transition(mode: &str) {
    counter!(
        "list_sync_mode_transitions_total",
        "mode" => mode.to_string()
    )
    .increment(1);
}

/// Record how long one startup phase took
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "list_sync_startup_phase_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set migration progress (0.0 - 1.0)
pub fn set_migration_progress(ratio: f64) {
    gauge!("list_sync_migration_progress").set(ratio);
}

/// Record a finished migration run
pub fn record_migration(outcome: &str, writes: usize, conflicts: usize, duration: Duration) {
    counter!("list_sync_migrations_total", "outcome" => outcome.to_string()).increment(1);
    counter!("list_sync_migration_writes_total").increment(writes as u64);
    counter!("list_sync_migration_conflicts_total").increment(conflicts as u64);
    histogram!("list_sync_migration_seconds").record(duration.as_secs_f64());
}

/// Record filter cache hit/miss
pub fn record_filter_cache(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(
        "list_sync_filter_cache_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Set filter cache size and hit rate gauges
pub fn set_filter_cache_stats(entries: usize, hit_rate: f64) {
    gauge!("list_sync_filter_cache_entries").set(entries as f64);
    gauge!("list_sync_filter_cache_hit_rate").set(hit_rate);
}

/// Record filter cache evictions (expired sweep or oldest-first)
pub fn record_filter_cache_eviction(reason: &str, count: usize) {
    counter!(
        "list_sync_filter_cache_evictions_total",
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

/// Record filter computation latency
pub fn record_filter_latency(path: &str, duration: Duration) {
    histogram!(
        "list_sync_filter_seconds",
        "path" => path.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    backend: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            start: Instant::now(),
        }
    }

    /// Time elapsed so far
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.backend, self.operation, self.start.elapsed());
    }
}
