pub mod batch;
pub mod config;
pub mod humanize;
pub mod locator;
pub mod observability;
pub mod paths;
pub mod progress;
pub mod segmented;
pub mod transport; // `transport::mock` is public for integration tests

pub use batch::{BatchDownloader, BatchSummary, DownloadJob, JobError, JobOutcome, JobStatus};
pub use segmented::{SegmentedDownloader, TransferError, TransferReport};
pub use transport::{HttpClient, HttpConfig, Transport};
