//! Progress reporting surface
//!
//! Engines push byte counts into a [`ProgressSink`] as data hits the disk.
//! The batch coordinator asks a [`ProgressFactory`] for one sink per job.
//! [`BarProgress`] renders a sink as an `indicatif` bar.

use crate::batch::DownloadJob;
use crate::humanize::ByteSize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Byte-counter sink
pub trait ProgressSink: Send + Sync {
    /// Called once before the first byte with the expected total, if known
    fn start(&self, total: Option<u64>);

    /// Called after `bytes` more bytes were written
    fn advance(&self, bytes: u64);

    /// Called once the transfer reached a terminal state
    fn finish(&self);
}

/// Creates a sink per batch job
pub trait ProgressFactory: Send + Sync {
    fn for_job(&self, job: &DownloadJob) -> Arc<dyn ProgressSink>;
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _total: Option<u64>) {}
    fn advance(&self, _bytes: u64) {}
    fn finish(&self) {}
}

impl ProgressFactory for NoProgress {
    fn for_job(&self, _job: &DownloadJob) -> Arc<dyn ProgressSink> {
        Arc::new(NoProgress)
    }
}

/// Point-in-time view of a [`ByteCounter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub written: u64,
    pub total: Option<u64>,
    pub finished: bool,
}

impl ProgressSnapshot {
    /// Whole percent complete, when the total is known
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(0) => Some(100),
            Some(total) => Some((self.written.min(total) * 100 / total) as u8),
            None => None,
        }
    }
}

/// Lock-free counter callers can poll to render progress
#[derive(Debug, Default)]
pub struct ByteCounter {
    written: AtomicU64,
    total: AtomicU64,
    has_total: AtomicBool,
    finished: AtomicBool,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            written: self.written.load(Ordering::Relaxed),
            total: self
                .has_total
                .load(Ordering::Acquire)
                .then(|| self.total.load(Ordering::Relaxed)),
            finished: self.finished.load(Ordering::Acquire),
        }
    }
}

impl ProgressSink for ByteCounter {
    fn start(&self, total: Option<u64>) {
        if let Some(total) = total {
            self.total.store(total, Ordering::Relaxed);
            self.has_total.store(true, Ordering::Release);
        }
    }

    fn advance(&self, bytes: u64) {
        self.written.fetch_add(bytes, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

const BAR_TEMPLATE: &str =
    "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";
const SPINNER_TEMPLATE: &str = "{msg} [{elapsed_precise}] {spinner} {bytes} ({bytes_per_sec})";

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Terminal progress bar for one transfer
///
/// Falls back to a byte-counting spinner when the total is unknown.
pub struct BarProgress {
    label: String,
    bar: ProgressBar,
    counter: ByteCounter,
}

impl BarProgress {
    /// Standalone bar drawn to stderr
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_bar(ProgressBar::no_length(), label)
    }

    fn with_bar(bar: ProgressBar, label: impl Into<String>) -> Self {
        let label = label.into();
        bar.set_message(label.clone());
        Self {
            label,
            bar,
            counter: ByteCounter::new(),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.counter.snapshot()
    }
}

impl ProgressSink for BarProgress {
    fn start(&self, total: Option<u64>) {
        self.counter.start(total);
        match total {
            Some(total) => {
                self.bar.set_style(bar_style());
                self.bar.set_length(total);
            }
            None => self.bar.set_style(spinner_style()),
        }
        self.bar.reset_elapsed();
    }

    fn advance(&self, bytes: u64) {
        self.counter.advance(bytes);
        self.bar.inc(bytes);
    }

    fn finish(&self) {
        self.counter.finish();
        self.bar.finish();
        debug!(
            file = %self.label,
            written = %ByteSize(self.counter.snapshot().written),
            "Transfer finished"
        );
    }
}

/// One [`MultiProgress`] per batch, one bar per job
#[derive(Clone)]
pub struct BarProgressFactory {
    multi: MultiProgress,
}

impl BarProgressFactory {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
        }
    }

    /// Tracks every bar without drawing anything
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    fn bar_for(&self, job: &DownloadJob) -> BarProgress {
        let label = job
            .destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| job.url.clone());
        BarProgress::with_bar(self.multi.add(ProgressBar::no_length()), label)
    }
}

impl Default for BarProgressFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressFactory for BarProgressFactory {
    fn for_job(&self, job: &DownloadJob) -> Arc<dyn ProgressSink> {
        Arc::new(self.bar_for(job))
    }
}
