use std::time::{Duration, Instant};

/// Metrics collection for storage, cleanup and sync.
///
/// Recording goes through the `metrics` facade; nothing is exported unless the host
/// installs a recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Store operations by kind and outcome
    pub const STORE_OPERATIONS_TOTAL: &'static str = "companion_store_operations_total";
    /// Store operation latency
    pub const STORE_OPERATION_DURATION: &'static str = "companion_store_operation_duration_seconds";
    /// Blobs that failed to decode and were replaced by a default
    pub const DECODE_FALLBACKS_TOTAL: &'static str = "companion_store_decode_fallbacks_total";
    /// Duplicate medication schedules removed
    pub const DUPLICATES_REMOVED_TOTAL: &'static str = "companion_store_duplicates_removed_total";
    /// Duplicate removals that failed
    pub const DUPLICATE_FAILURES_TOTAL: &'static str = "companion_store_duplicate_failures_total";
    /// Sync runs by outcome
    pub const SYNC_RUNS_TOTAL: &'static str = "companion_store_sync_runs_total";
    /// Aggregates pushed to the backend
    pub const SYNC_PUSHED_TOTAL: &'static str = "companion_store_sync_pushed_total";
    /// Sync run latency
    pub const SYNC_DURATION: &'static str = "companion_store_sync_duration_seconds";
    /// Log entries dropped by retention pruning
    pub const RETENTION_PRUNED_TOTAL: &'static str = "companion_store_retention_pruned_total";

    /// Record one store call
    pub fn record_store_operation(operation: &'static str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics::counter!(Self::STORE_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
        metrics::histogram!(Self::STORE_OPERATION_DURATION, "operation" => operation).record(duration.as_secs_f64());
    }

    /// Record a decode fallback for `key`
    pub fn record_decode_fallback(key: &'static str) {
        metrics::counter!(Self::DECODE_FALLBACKS_TOTAL, "key" => key).increment(1);
    }

    /// Record the outcome of a duplicate cleanup
    pub fn record_duplicate_cleanup(removed: usize, failed: usize) {
        metrics::counter!(Self::DUPLICATES_REMOVED_TOTAL).increment(removed as u64);
        metrics::counter!(Self::DUPLICATE_FAILURES_TOTAL).increment(failed as u64);
    }

    /// Record the outcome of a sync run
    pub fn record_sync(duration: Duration, pushed: usize, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics::counter!(Self::SYNC_RUNS_TOTAL, "status" => status).increment(1);
        metrics::counter!(Self::SYNC_PUSHED_TOTAL).increment(pushed as u64);
        metrics::histogram!(Self::SYNC_DURATION).record(duration.as_secs_f64());
    }

    /// Record retention pruning of `key`
    pub fn record_retention_pruned(key: &'static str, pruned: usize) {
        metrics::counter!(Self::RETENTION_PRUNED_TOTAL, "key" => key).increment(pruned as u64);
    }
}

/// Performance timing wrapper for sync runs
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    /// Start timing
    #[must_use]
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// Elapsed time so far
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timing and record a sync run
    pub fn finish_sync(self, pushed: usize, success: bool) {
        MetricsCollector::record_sync(self.start.elapsed(), pushed, success);
    }
}
