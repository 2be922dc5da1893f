//! Segmented transfer engine
//!
//! Fetches one resource as parallel byte-range segments:
//!
//! 1. **Size probe** - HEAD must answer `200 OK` with a Content-Length
//! 2. **Dispatch** - one task per planned [`Segment`], each streaming its
//!    `206 Partial Content` body into `<destination>.part<index>`
//! 3. **Await all** - every segment runs to success or failure; a failing
//!    segment never cancels its siblings
//! 4. **Merge** only when every segment succeeded, otherwise fail as a whole
//!
//! There is no segment-level retry. A failed transfer is retried from the top.

pub mod merge;
pub mod plan;

pub use merge::{DEFAULT_COPY_BUFFER, MergeError, merge_parts, merge_parts_buffered};
pub use plan::{MAX_SEGMENTS, MIN_SEGMENTS, Segment, SegmentStatus, plan_segments};

use crate::humanize::ByteSize;
use crate::observability::Metrics;
use crate::progress::{NoProgress, ProgressSink};
use crate::transport::{Request, Transport, TransportError};
use futures_util::StreamExt;
use futures_util::future::join_all;
use reqwest::StatusCode;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a single segment failed
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("expected 206 Partial Content, got {0}")]
    UnexpectedStatus(String),

    #[error("expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },

    #[error("part file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("segment task panicked: {0}")]
    Panicked(String),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub struct SegmentFailure {
    pub index: usize,
    pub error: SegmentError,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("segment count must be between 1 and 6, got {0}")]
    InvalidSegmentCount(u8),

    #[error("size probe failed: {0}")]
    SizeProbeFailed(String),

    #[error(
        "one or more segments failed ({} of {total}); retry the whole transfer",
        .failures.len()
    )]
    SegmentsFailed {
        failures: Vec<SegmentFailure>,
        total: usize,
    },

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("transfer cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, TransferError>;

/// Outcome of a completed transfer
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub url: String,
    pub destination: PathBuf,
    pub size: u64,
    pub segments: Vec<Segment>,
}

/// Downloads one URL as parallel range requests
#[derive(Clone)]
pub struct SegmentedDownloader {
    transport: Arc<dyn Transport>,
    progress: Arc<dyn ProgressSink>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
}

impl SegmentedDownloader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            progress: Arc::new(NoProgress),
            metrics: Arc::new(Metrics::new()),
            buffer_size: DEFAULT_COPY_BUFFER,
        }
    }

    /// Sink receiving cumulative bytes across all segments
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Write buffer for part files and the merge copy
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Fetch `url` into `destination` using `segment_count` ranges (1..=6)
    ///
    /// The destination is only written once every segment succeeded.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        segment_count: u8,
        cancel: &CancellationToken,
    ) -> Result<TransferReport> {
        if !(MIN_SEGMENTS..=MAX_SEGMENTS).contains(&segment_count) {
            return Err(TransferError::InvalidSegmentCount(segment_count));
        }
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let size = self.probe(url).await?;
        let mut segments = plan_segments(size, segment_count, destination);

        info!(
            url,
            destination = %destination.display(),
            size = %ByteSize(size),
            segments = segments.len(),
            "Starting segmented transfer"
        );
        self.progress.start(Some(size));

        let tasks: Vec<_> = segments
            .iter()
            .cloned()
            .map(|segment| {
                let fetch = SegmentFetch {
                    transport: self.transport.clone(),
                    progress: self.progress.clone(),
                    url: url.to_string(),
                    buffer_size: self.buffer_size,
                    cancel: cancel.clone(),
                };
                tokio::spawn(fetch.run(segment))
            })
            .collect();

        let results = join_all(tasks).await;

        let mut failures = Vec::new();
        for (segment, joined) in segments.iter_mut().zip(results) {
            let result = joined.unwrap_or_else(|e| Err(SegmentError::Panicked(e.to_string())));
            match result {
                Ok(bytes) => {
                    segment.status = SegmentStatus::Succeeded;
                    debug!(index = segment.index, bytes, "Segment complete");
                }
                Err(error) => {
                    segment.status = SegmentStatus::Failed;
                    self.metrics.segment_failed();
                    warn!(
                        url,
                        index = segment.index,
                        range = %segment.range().header_value(),
                        error = %error,
                        "Segment failed"
                    );
                    failures.push(SegmentFailure {
                        index: segment.index,
                        error,
                    });
                }
            }
        }

        if !failures.is_empty() {
            discard_parts(&segments).await;
            self.progress.finish();
            return Err(TransferError::SegmentsFailed {
                failures,
                total: segments.len(),
            });
        }

        let merged = merge_parts_buffered(destination, segments.len(), self.buffer_size).await;
        self.progress.finish();
        let written = match merged {
            Ok(written) => written,
            Err(e) => {
                discard_parts(&segments).await;
                return Err(e.into());
            }
        };

        self.metrics.bytes_written(written);
        info!(
            url,
            destination = %destination.display(),
            size = %ByteSize(written),
            "Segmented transfer complete"
        );

        Ok(TransferReport {
            url: url.to_string(),
            destination: destination.to_path_buf(),
            size,
            segments,
        })
    }

    async fn probe(&self, url: &str) -> Result<u64> {
        let head = self
            .transport
            .head(url)
            .await
            .map_err(|e| TransferError::SizeProbeFailed(e.to_string()))?;

        if head.status != StatusCode::OK {
            return Err(TransferError::SizeProbeFailed(format!(
                "HEAD returned {}",
                head.status_line()
            )));
        }

        head.content_length.ok_or_else(|| {
            TransferError::SizeProbeFailed("server did not report a content length".to_string())
        })
    }
}

/// Everything one segment task owns
struct SegmentFetch {
    transport: Arc<dyn Transport>,
    progress: Arc<dyn ProgressSink>,
    url: String,
    buffer_size: usize,
    cancel: CancellationToken,
}

impl SegmentFetch {
    async fn run(self, segment: Segment) -> std::result::Result<u64, SegmentError> {
        if self.cancel.is_cancelled() {
            return Err(SegmentError::Cancelled);
        }

        let request = Request::ranged(self.url.as_str(), segment.range());
        let response = match self.transport.send(request, &self.cancel).await {
            Ok(response) => response,
            Err(TransportError::Cancelled) => return Err(SegmentError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        if response.status != StatusCode::PARTIAL_CONTENT {
            return Err(SegmentError::UnexpectedStatus(response.status_line()));
        }

        let file = File::create(&segment.part_path).await?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let mut body = response.body;
        let expected = segment.expected_len();
        let mut received = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SegmentError::Cancelled),
                next = body.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            received += chunk.len() as u64;
            if received > expected {
                return Err(SegmentError::LengthMismatch { expected, received });
            }
            writer.write_all(&chunk).await?;
            self.progress.advance(chunk.len() as u64);
        }

        writer.flush().await?;

        if received != expected {
            return Err(SegmentError::LengthMismatch { expected, received });
        }
        Ok(received)
    }
}

/// Remove part files left behind by a failed transfer
async fn discard_parts(segments: &[Segment]) {
    for segment in segments {
        match tokio::fs::remove_file(&segment.part_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %segment.part_path.display(),
                error = %e,
                "Failed to remove part file"
            ),
        }
    }
}
