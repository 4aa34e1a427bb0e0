// Run metrics module
//
// Lightweight counters for the outcome of a batch run

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Per-run conversion metrics
///
/// Uses atomic operations so every worker can record outcomes without locks.
/// Logged once when the pool has been joined.
#[derive(Debug, Default)]
pub struct RunMetrics {
    /// Tasks whose stages all succeeded (or were skipped by design)
    pub tasks_succeeded: AtomicUsize,

    /// Tasks with at least one failed stage
    pub tasks_failed: AtomicUsize,

    /// Import stages that failed to spawn or exited non-zero
    pub imports_failed: AtomicUsize,

    /// Export stages that failed to spawn or exited non-zero
    pub exports_failed: AtomicUsize,

    /// Export stages not run (texture files or failure policy)
    pub exports_skipped: AtomicUsize,

    /// Time spent inside converter processes, in milliseconds
    pub total_stage_time_ms: AtomicU64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_task_succeeded(&self) {
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_import_failed(&self) {
        self.imports_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_failed(&self) {
        self.exports_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_skipped(&self) {
        self.exports_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent in one converter invocation
    pub fn record_stage_time(&self, duration: Duration) {
        self.total_stage_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn tasks_processed(&self) -> usize {
        self.tasks_succeeded.load(Ordering::Relaxed) + self.tasks_failed.load(Ordering::Relaxed)
    }

    /// Average converter time per processed task in milliseconds
    pub fn avg_task_time_ms(&self) -> f64 {
        let total = self.total_stage_time_ms.load(Ordering::Relaxed);
        let count = self.tasks_processed();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self, elapsed: Duration) {
        tracing::info!("=== Run Metrics Summary ===");
        tracing::info!("Elapsed: {:.2}s", elapsed.as_secs_f64());
        tracing::info!(
            "Tasks: {} succeeded, {} failed",
            self.tasks_succeeded.load(Ordering::Relaxed),
            self.tasks_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Stages: {} imports failed, {} exports failed, {} exports skipped",
            self.imports_failed.load(Ordering::Relaxed),
            self.exports_failed.load(Ordering::Relaxed),
            self.exports_skipped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Converter time: {:.2}s (avg: {:.2}ms per task)",
            self.total_stage_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_task_time_ms()
        );
    }
}
