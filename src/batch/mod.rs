//! Batch download coordinator
//!
//! Fetches many independent URLs behind a counting admission gate. Each job:
//!
//! 1. Skips without touching the network if its destination already exists
//! 2. Waits for a gate permit (or the cancellation signal)
//! 3. HEAD for the progress total, then GET
//! 4. Streams the body into `<destination>.download` and renames it into place
//!
//! One job's failure never affects its siblings. Outcomes come back in the
//! order the jobs were given.

use crate::humanize::ByteSize;
use crate::locator::UrlProvider;
use crate::observability::Metrics;
use crate::paths::{file_name_from_url, staging_path};
use crate::progress::{NoProgress, ProgressFactory, ProgressSink};
use crate::segmented::DEFAULT_COPY_BUFFER;
use crate::transport::{BodyStream, Transport};
use futures_util::StreamExt;
use futures_util::future::join_all;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Skipped,
    Succeeded,
    Failed,
}

/// One URL and where it lands
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: Uuid,
    pub url: String,
    pub destination: PathBuf,
    pub status: JobStatus,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            destination: destination.into(),
            status: JobStatus::Pending,
        }
    }

    /// Job saving `url` under `dir`, named after the URL's last path segment
    pub fn in_dir(url: impl Into<String>, dir: &Path) -> Self {
        let url = url.into();
        let destination = dir.join(file_name_from_url(&url));
        Self::new(url, destination)
    }
}

/// Build one job per URL the provider yields
pub fn jobs_from_provider(provider: &dyn UrlProvider, dir: &Path) -> Vec<DownloadJob> {
    provider
        .urls()
        .into_iter()
        .map(|url| DownloadJob::in_dir(url, dir))
        .collect()
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("HEAD request failed: {0}")]
    HeadFailed(String),

    #[error("GET request failed: {0}")]
    FetchFailed(String),

    #[error("server returned {0}")]
    HttpStatus(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cancelled before the transfer started")]
    Cancelled,

    #[error("download task panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Terminal state of one job
#[derive(Debug)]
pub struct JobOutcome {
    pub job: DownloadJob,
    pub bytes_written: u64,
    pub error: Option<JobError>,
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        self.job.status
    }
}

/// Per-status tally of a finished batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_written: u64,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[JobOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut summary, outcome| {
            match outcome.status() {
                JobStatus::Succeeded => summary.succeeded += 1,
                JobStatus::Skipped => summary.skipped += 1,
                JobStatus::Failed | JobStatus::Pending => summary.failed += 1,
            }
            summary.bytes_written += outcome.bytes_written;
            summary
        })
    }
}

enum Fetched {
    Skipped,
    Written(u64),
}

/// Runs batches of independent downloads over a shared [`Transport`]
#[derive(Clone)]
pub struct BatchDownloader {
    transport: Arc<dyn Transport>,
    progress: Arc<dyn ProgressFactory>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
}

impl BatchDownloader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            progress: Arc::new(NoProgress),
            metrics: Arc::new(Metrics::new()),
            buffer_size: DEFAULT_COPY_BUFFER,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressFactory>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Download every job with at most `concurrency_limit` transfers in flight
    ///
    /// Returns once every job reached a terminal state. A cancelled token
    /// resolves jobs that have not started their transfer as failed with
    /// [`JobError::Cancelled`]; transfers already underway finish normally.
    pub async fn download_many(
        &self,
        jobs: Vec<DownloadJob>,
        concurrency_limit: usize,
        cancel: &CancellationToken,
    ) -> Vec<JobOutcome> {
        let limit = if concurrency_limit == 0 {
            warn!("Concurrency limit of 0 requested, using 1");
            1
        } else {
            concurrency_limit
        };

        info!(jobs = jobs.len(), concurrency = limit, "Starting batch");

        let gate = Arc::new(Semaphore::new(limit));
        let (pending, handles): (Vec<_>, Vec<_>) = jobs
            .into_iter()
            .map(|job| {
                let worker = JobWorker {
                    transport: self.transport.clone(),
                    progress: self.progress.clone(),
                    metrics: self.metrics.clone(),
                    buffer_size: self.buffer_size,
                    gate: gate.clone(),
                    cancel: cancel.clone(),
                };
                (job.clone(), tokio::spawn(worker.run(job)))
            })
            .unzip();

        let results = join_all(handles).await;

        let outcomes: Vec<JobOutcome> = pending
            .into_iter()
            .zip(results)
            .map(|(mut job, joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    job.status = JobStatus::Failed;
                    self.metrics.job_failed();
                    warn!(url = %job.url, error = %e, "Download task panicked");
                    JobOutcome {
                        job,
                        bytes_written: 0,
                        error: Some(JobError::Panicked(e.to_string())),
                    }
                }
            })
            .collect();

        let summary = BatchSummary::from_outcomes(&outcomes);
        info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            written = %ByteSize(summary.bytes_written),
            "Batch complete"
        );

        outcomes
    }
}

/// Per-job task state
struct JobWorker {
    transport: Arc<dyn Transport>,
    progress: Arc<dyn ProgressFactory>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
    gate: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl JobWorker {
    async fn run(self, mut job: DownloadJob) -> JobOutcome {
        match self.execute(&job).await {
            Ok(Fetched::Skipped) => {
                job.status = JobStatus::Skipped;
                self.metrics.job_skipped();
                info!(
                    destination = %job.destination.display(),
                    "File already exists, skipping"
                );
                JobOutcome {
                    job,
                    bytes_written: 0,
                    error: None,
                }
            }
            Ok(Fetched::Written(bytes)) => {
                job.status = JobStatus::Succeeded;
                self.metrics.job_succeeded();
                self.metrics.bytes_written(bytes);
                info!(
                    url = %job.url,
                    destination = %job.destination.display(),
                    size = %ByteSize(bytes),
                    "Download complete"
                );
                JobOutcome {
                    job,
                    bytes_written: bytes,
                    error: None,
                }
            }
            Err(error) => {
                job.status = JobStatus::Failed;
                self.metrics.job_failed();
                warn!(url = %job.url, error = %error, "Download failed");
                JobOutcome {
                    job,
                    bytes_written: 0,
                    error: Some(error),
                }
            }
        }
    }

    async fn execute(&self, job: &DownloadJob) -> Result<Fetched> {
        // An existing file stays a skip even after an interrupt
        if is_regular_file(&job.destination).await {
            return Ok(Fetched::Skipped);
        }

        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        // Held until this function returns, whatever the exit path
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(JobError::Cancelled),
            permit = self.gate.clone().acquire_owned() => {
                permit.map_err(|_| JobError::Cancelled)?
            }
        };

        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        debug!(url = %job.url, "Slot acquired");

        let head = self
            .transport
            .head(&job.url)
            .await
            .map_err(|e| JobError::HeadFailed(e.to_string()))?;
        if !head.status.is_success() {
            return Err(JobError::HeadFailed(format!(
                "HEAD returned {}",
                head.status_line()
            )));
        }

        // Last point before the GET starts
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let response = self
            .transport
            .get(&job.url)
            .await
            .map_err(|e| JobError::FetchFailed(e.to_string()))?;
        if !response.status.is_success() {
            return Err(JobError::HttpStatus(response.status_line()));
        }

        let progress = self.progress.for_job(job);
        progress.start(head.content_length.or(response.content_length));
        let written = stream_to_file(
            response.body,
            &job.destination,
            self.buffer_size,
            progress.as_ref(),
        )
        .await;
        progress.finish();

        written.map(Fetched::Written)
    }
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Stream `body` into a staging file, then rename it over `destination`
///
/// The staging file is removed on any failure.
async fn stream_to_file(
    body: BodyStream,
    destination: &Path,
    buffer_size: usize,
    progress: &dyn ProgressSink,
) -> Result<u64> {
    let staging = staging_path(destination);

    let result = match write_staging(body, &staging, buffer_size, progress).await {
        Ok(written) => tokio::fs::rename(&staging, destination)
            .await
            .map(|()| written)
            .map_err(|source| JobError::Io {
                path: destination.to_path_buf(),
                source,
            }),
        Err(e) => Err(e),
    };

    if result.is_err()
        && let Err(e) = tokio::fs::remove_file(&staging).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
    }

    result
}

async fn write_staging(
    mut body: BodyStream,
    staging: &Path,
    buffer_size: usize,
    progress: &dyn ProgressSink,
) -> Result<u64> {
    let io_error = |source| JobError::Io {
        path: staging.to_path_buf(),
        source,
    };

    let file = File::create(staging).await.map_err(io_error)?;
    let mut writer = BufWriter::with_capacity(buffer_size, file);
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| JobError::FetchFailed(e.to_string()))?;
        writer.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
        progress.advance(chunk.len() as u64);
    }

    writer.flush().await.map_err(io_error)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::StaticUrlProvider;
    use crate::progress::ByteCounter;
    use crate::transport::mock::MockTransport;
    use crate::transport::{HeadResponse, Request, Response};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn url(name: &str) -> String {
        format!("http://mock/{name}")
    }

    fn transport_with(names: &[&str]) -> MockTransport {
        names.iter().fold(MockTransport::new(), |t, name| {
            t.with_resource(&url(name), format!("contents of {name}"))
        })
    }

    fn jobs_for(names: &[&str], dir: &Path) -> Vec<DownloadJob> {
        names.iter().map(|n| DownloadJob::in_dir(url(n), dir)).collect()
    }

    #[derive(Default)]
    struct RecordingFactory {
        sinks: Mutex<Vec<Arc<ByteCounter>>>,
    }

    impl ProgressFactory for RecordingFactory {
        fn for_job(&self, _job: &DownloadJob) -> Arc<dyn ProgressSink> {
            let counter = Arc::new(ByteCounter::new());
            self.sinks.lock().unwrap().push(counter.clone());
            counter
        }
    }

    /// Fires the cancellation token while answering HEAD
    struct CancelDuringHead {
        inner: Arc<MockTransport>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Transport for CancelDuringHead {
        async fn head(&self, url: &str) -> crate::transport::Result<HeadResponse> {
            let head = self.inner.head(url).await;
            self.cancel.cancel();
            head
        }

        async fn get(&self, url: &str) -> crate::transport::Result<Response> {
            self.inner.get(url).await
        }

        async fn send(
            &self,
            request: Request,
            cancel: &CancellationToken,
        ) -> crate::transport::Result<Response> {
            self.inner.send(request, cancel).await
        }
    }

    #[test]
    fn test_job_named_after_url() {
        let job = DownloadJob::in_dir("https://example.com/dist/app.tar.gz?sig=1", Path::new("/data"));
        assert_eq!(job.destination, PathBuf::from("/data/app.tar.gz"));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_jobs_from_provider_skip_invalid_urls() {
        let provider = StaticUrlProvider::new(vec![
            "https://example.com/a.bin".to_string(),
            "nope".to_string(),
        ]);
        let jobs = jobs_from_provider(&provider, Path::new("/data"));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].destination, PathBuf::from("/data/a.bin"));
    }

    #[tokio::test]
    async fn test_downloads_every_job_in_input_order() {
        let names = ["c.txt", "a.txt", "b.txt"];
        let transport = Arc::new(transport_with(&names));
        let temp_dir = TempDir::new().unwrap();
        let metrics = Arc::new(Metrics::new());

        let outcomes = BatchDownloader::new(transport.clone())
            .with_metrics(metrics.clone())
            .download_many(jobs_for(&names, temp_dir.path()), 2, &CancellationToken::new())
            .await;

        assert_eq!(outcomes.len(), 3);
        for (outcome, name) in outcomes.iter().zip(names) {
            assert_eq!(outcome.job.url, url(name));
            assert_eq!(outcome.status(), JobStatus::Succeeded);
            assert!(outcome.error.is_none());
            let contents = std::fs::read_to_string(temp_dir.path().join(name)).unwrap();
            assert_eq!(contents, format!("contents of {name}"));
            assert!(!staging_path(&outcome.job.destination).exists());
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_succeeded, 3);
        assert_eq!(snapshot.bytes_written, outcomes.iter().map(|o| o.bytes_written).sum::<u64>());
        assert_eq!(transport.head_calls(), 3);
        assert_eq!(transport.get_calls(), 3);
    }

    #[tokio::test]
    async fn test_rerun_performs_no_network_calls() {
        let names = ["one.bin", "two.bin"];
        let transport = Arc::new(transport_with(&names));
        let temp_dir = TempDir::new().unwrap();
        let downloader = BatchDownloader::new(transport.clone());
        let cancel = CancellationToken::new();

        downloader
            .download_many(jobs_for(&names, temp_dir.path()), 2, &cancel)
            .await;
        let calls_after_first_run = transport.total_calls();

        let outcomes = downloader
            .download_many(jobs_for(&names, temp_dir.path()), 2, &cancel)
            .await;

        assert_eq!(transport.total_calls(), calls_after_first_run);
        assert!(outcomes.iter().all(|o| o.status() == JobStatus::Skipped));
        assert_eq!(BatchSummary::from_outcomes(&outcomes).skipped, 2);
    }

    #[tokio::test]
    async fn test_existing_file_is_left_untouched() {
        let transport = Arc::new(transport_with(&["keep.txt"]));
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("keep.txt");
        std::fs::write(&existing, "local edits").unwrap();

        let outcomes = BatchDownloader::new(transport.clone())
            .download_many(jobs_for(&["keep.txt"], temp_dir.path()), 1, &CancellationToken::new())
            .await;

        assert_eq!(outcomes[0].status(), JobStatus::Skipped);
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "local edits");
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let names = ["1", "2", "3", "4", "5", "6"];
        let transport = Arc::new(
            transport_with(&names)
                .with_latency(Duration::from_millis(100))
                .with_chunk_size(1),
        );
        let temp_dir = TempDir::new().unwrap();

        let started = Instant::now();
        let outcomes = BatchDownloader::new(transport.clone())
            .download_many(jobs_for(&names, temp_dir.path()), 2, &CancellationToken::new())
            .await;
        let elapsed = started.elapsed();

        assert!(outcomes.iter().all(|o| o.status() == JobStatus::Succeeded));
        assert!(transport.max_inflight() <= 2);
        // 6 jobs, 2 at a time, 100ms each
        assert!(elapsed >= Duration::from_millis(290), "finished in {elapsed:?}");
    }

    #[tokio::test]
    async fn test_zero_limit_runs_serially() {
        let names = ["a", "b"];
        let transport = Arc::new(transport_with(&names));
        let temp_dir = TempDir::new().unwrap();

        let outcomes = BatchDownloader::new(transport.clone())
            .download_many(jobs_for(&names, temp_dir.path()), 0, &CancellationToken::new())
            .await;

        assert!(outcomes.iter().all(|o| o.status() == JobStatus::Succeeded));
        assert_eq!(transport.max_inflight(), 1);
    }

    #[tokio::test]
    async fn test_head_failure_skips_get() {
        let transport = Arc::new(
            transport_with(&["bad.bin", "good.bin"]).with_head_error(&url("bad.bin")),
        );
        let temp_dir = TempDir::new().unwrap();

        let outcomes = BatchDownloader::new(transport.clone())
            .download_many(
                jobs_for(&["bad.bin", "good.bin"], temp_dir.path()),
                2,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcomes[0].status(), JobStatus::Failed);
        assert!(matches!(outcomes[0].error, Some(JobError::HeadFailed(_))));
        assert!(!temp_dir.path().join("bad.bin").exists());
        // Sibling unaffected
        assert_eq!(outcomes[1].status(), JobStatus::Succeeded);
        assert_eq!(transport.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_error_status_fails_without_creating_file() {
        let transport = Arc::new(
            transport_with(&["gone.bin"]).with_get_status(&url("gone.bin"), StatusCode::NOT_FOUND),
        );
        let temp_dir = TempDir::new().unwrap();

        let outcomes = BatchDownloader::new(transport.clone())
            .download_many(jobs_for(&["gone.bin"], temp_dir.path()), 1, &CancellationToken::new())
            .await;

        let outcome = &outcomes[0];
        assert_eq!(outcome.status(), JobStatus::Failed);
        assert_eq!(outcome.error.as_ref().unwrap().to_string(), "server returned 404 Not Found");
        assert!(!outcome.job.destination.exists());
        assert!(!staging_path(&outcome.job.destination).exists());
    }

    #[tokio::test]
    async fn test_unknown_length_still_downloads() {
        let transport = Arc::new(
            transport_with(&["stream.log"]).without_content_length(&url("stream.log")),
        );
        let temp_dir = TempDir::new().unwrap();
        let factory = Arc::new(RecordingFactory::default());

        let outcomes = BatchDownloader::new(transport)
            .with_progress(factory.clone())
            .download_many(jobs_for(&["stream.log"], temp_dir.path()), 1, &CancellationToken::new())
            .await;

        assert_eq!(outcomes[0].status(), JobStatus::Succeeded);
        let sinks = factory.sinks.lock().unwrap();
        let snapshot = sinks[0].snapshot();
        assert_eq!(snapshot.written, "contents of stream.log".len() as u64);
        assert!(snapshot.finished);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_calls() {
        let names = ["a", "b", "c"];
        let transport = Arc::new(transport_with(&names));
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = BatchDownloader::new(transport.clone())
            .download_many(jobs_for(&names, temp_dir.path()), 2, &cancel)
            .await;

        assert!(
            outcomes
                .iter()
                .all(|o| matches!(o.error, Some(JobError::Cancelled)))
        );
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_head_prevents_get() {
        let inner = Arc::new(transport_with(&["late.bin"]));
        let cancel = CancellationToken::new();
        let transport = Arc::new(CancelDuringHead {
            inner: inner.clone(),
            cancel: cancel.clone(),
        });
        let temp_dir = TempDir::new().unwrap();

        let outcomes = BatchDownloader::new(transport)
            .download_many(jobs_for(&["late.bin"], temp_dir.path()), 1, &cancel)
            .await;

        assert_eq!(outcomes[0].status(), JobStatus::Failed);
        assert!(matches!(outcomes[0].error, Some(JobError::Cancelled)));
        assert_eq!(inner.head_calls(), 1);
        assert_eq!(inner.get_calls(), 0);
        assert!(!temp_dir.path().join("late.bin").exists());
    }

    #[tokio::test]
    async fn test_existing_file_is_skipped_after_cancel() {
        let transport = Arc::new(transport_with(&["done.bin", "todo.bin"]));
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("done.bin"), "finished earlier").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = BatchDownloader::new(transport.clone())
            .download_many(jobs_for(&["done.bin", "todo.bin"], temp_dir.path()), 2, &cancel)
            .await;

        assert_eq!(outcomes[0].status(), JobStatus::Skipped);
        assert!(outcomes[0].error.is_none());
        assert!(matches!(outcomes[1].error, Some(JobError::Cancelled)));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_resolves_waiting_jobs() {
        let names = ["1", "2", "3", "4"];
        let transport = Arc::new(
            transport_with(&names).with_latency(Duration::from_millis(100)),
        );
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let outcomes = tokio::time::timeout(
            Duration::from_secs(5),
            BatchDownloader::new(transport.clone()).download_many(
                jobs_for(&names, temp_dir.path()),
                1,
                &cancel,
            ),
        )
        .await
        .expect("cancelled batch must not hang");

        let summary = BatchSummary::from_outcomes(&outcomes);
        let cancelled = outcomes
            .iter()
            .filter(|o| matches!(o.error, Some(JobError::Cancelled)))
            .count();

        assert!(summary.succeeded >= 1);
        assert!(cancelled >= 1);
        assert_eq!(summary.succeeded + cancelled, 4);
        // In-flight transfers complete; nothing is left half written
        for outcome in &outcomes {
            assert!(!staging_path(&outcome.job.destination).exists());
        }
    }
}
