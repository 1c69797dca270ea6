//! Metrics collection for pool monitoring.

use crate::executor::task::TaskStatus;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// One hour in nanoseconds.
const MAX_TRACKED_NS: u64 = 3_600_000_000_000;

fn latency_histogram() -> Histogram<u64> {
    Histogram::new_with_max(MAX_TRACKED_NS, 3).expect("static histogram bounds are valid")
}

/// Pool-wide counters and latency histograms.
#[derive(Debug)]
pub struct Metrics {
    tasks_submitted: AtomicU64,
    tasks_rejected: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_cancelled: AtomicU64,
    busy_time_ns: AtomicU64,

    run_histogram: RwLock<Histogram<u64>>,
    wait_histogram: RwLock<Histogram<u64>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_cancelled: AtomicU64::new(0),
            busy_time_ns: AtomicU64::new(0),
            run_histogram: RwLock::new(latency_histogram()),
            wait_histogram: RwLock::new(latency_histogram()),
            start_time: Instant::now(),
        }
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records how long a task sat in the ready queue.
    pub fn record_dispatch(&self, queued_for: Duration) {
        self.wait_histogram
            .write()
            .saturating_record(queued_for.as_nanos() as u64);
    }

    /// Records a task reaching a terminal status after running for `elapsed`.
    pub fn record_finished(&self, status: TaskStatus, elapsed: Duration) {
        let ns = elapsed.as_nanos() as u64;
        match status {
            TaskStatus::Completed => {
                self.tasks_completed.fetch_add(1, Ordering::Relaxed);
            }
            TaskStatus::Failed => {
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.busy_time_ns.fetch_add(ns, Ordering::Relaxed);
        self.run_histogram.write().saturating_record(ns);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let run = self.run_histogram.read();
        let wait = self.wait_histogram.read();

        MetricsSnapshot {
            timestamp: Instant::now(),
            uptime: self.start_time.elapsed(),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            tasks_panicked: 0,
            busy_time_ns: self.busy_time_ns.load(Ordering::Relaxed),
            avg_run_ns: if run.len() > 0 { run.mean() as u64 } else { 0 },
            p50_run_ns: run.value_at_quantile(0.50),
            p99_run_ns: run.value_at_quantile(0.99),
            max_run_ns: run.max(),
            avg_wait_ns: if wait.len() > 0 { wait.mean() as u64 } else { 0 },
            p99_wait_ns: wait.value_at_quantile(0.99),
        }
    }

    pub fn reset(&self) {
        self.tasks_submitted.store(0, Ordering::Relaxed);
        self.tasks_rejected.store(0, Ordering::Relaxed);
        self.tasks_completed.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.tasks_cancelled.store(0, Ordering::Relaxed);
        self.busy_time_ns.store(0, Ordering::Relaxed);
        self.run_histogram.write().reset();
        self.wait_histogram.write().reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: Instant,
    pub uptime: Duration,
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    /// Subset of `tasks_failed` that panicked rather than returning an error.
    pub tasks_panicked: u64,
    pub busy_time_ns: u64,
    pub avg_run_ns: u64,
    pub p50_run_ns: u64,
    pub p99_run_ns: u64,
    pub max_run_ns: u64,
    pub avg_wait_ns: u64,
    pub p99_wait_ns: u64,
}

impl MetricsSnapshot {
    /// Tasks that reached a terminal status.
    pub fn tasks_finished(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_cancelled
    }

    /// Accepted tasks not yet terminal.
    pub fn in_flight(&self) -> u64 {
        self.tasks_submitted.saturating_sub(self.tasks_finished())
    }

    pub fn tasks_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        (self.tasks_completed + self.tasks_failed) as f64 / seconds
    }
}
