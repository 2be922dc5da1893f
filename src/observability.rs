//! Download counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle shared by the coordinators
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_skipped: AtomicU64,
    segments_failed: AtomicU64,
    bytes_written: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_succeeded", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn job_skipped(&self) {
        self.jobs_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_skipped", "Metric incremented");
    }

    pub fn segment_failed(&self) {
        self.segments_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "segments_failed", "Metric incremented");
    }

    pub fn bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_skipped: self.jobs_skipped.load(Ordering::Relaxed),
            segments_failed: self.segments_failed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
    pub segments_failed: u64,
    pub bytes_written: u64,
}
