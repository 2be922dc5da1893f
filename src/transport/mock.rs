//! In-memory transport serving canned resources
//!
//! Exposed publicly so integration tests can drive the engines without a
//! network. Every call is counted, which lets tests assert that a code path
//! performed no requests at all.

use super::{
    BodyStream, ByteRange, HeadResponse, Request, Response, Result, Transport, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone)]
struct MockResource {
    body: Bytes,
    head_error: bool,
    head_status: StatusCode,
    advertise_length: bool,
    get_status: StatusCode,
    range_status: StatusCode,
    failing_ranges: HashSet<u64>,
    stalled_ranges: HashSet<u64>,
    short_ranges: bool,
}

impl MockResource {
    fn new(body: Bytes) -> Self {
        Self {
            body,
            head_error: false,
            head_status: StatusCode::OK,
            advertise_length: true,
            get_status: StatusCode::OK,
            range_status: StatusCode::PARTIAL_CONTENT,
            failing_ranges: HashSet::new(),
            stalled_ranges: HashSet::new(),
            short_ranges: false,
        }
    }
}

/// Decrements the in-flight counter when a response body is dropped
struct InflightGuard(Arc<AtomicUsize>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Deterministic [`Transport`] for tests
///
/// Unknown URLs answer `404 Not Found` to every method.
#[derive(Debug, Default)]
pub struct MockTransport {
    resources: HashMap<String, MockResource>,
    latency: Option<Duration>,
    chunk_size: Option<usize>,
    head_calls: AtomicUsize,
    get_calls: AtomicUsize,
    send_calls: AtomicUsize,
    ranges: Mutex<Vec<ByteRange>>,
    inflight: Arc<AtomicUsize>,
    max_inflight: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`: HEAD 200 with length, GET 200, ranges 206
    pub fn with_resource(mut self, url: &str, body: impl Into<Bytes>) -> Self {
        self.resources
            .insert(url.to_string(), MockResource::new(body.into()));
        self
    }

    /// HEAD on `url` fails at the transport level
    pub fn with_head_error(self, url: &str) -> Self {
        self.update(url, |r| r.head_error = true)
    }

    pub fn with_head_status(self, url: &str, status: StatusCode) -> Self {
        self.update(url, |r| r.head_status = status)
    }

    /// HEAD on `url` omits Content-Length
    pub fn without_content_length(self, url: &str) -> Self {
        self.update(url, |r| r.advertise_length = false)
    }

    pub fn with_get_status(self, url: &str, status: StatusCode) -> Self {
        self.update(url, |r| r.get_status = status)
    }

    pub fn with_range_status(self, url: &str, status: StatusCode) -> Self {
        self.update(url, |r| r.range_status = status)
    }

    /// Range requests starting at `start` fail at the transport level
    pub fn with_failing_range(self, url: &str, start: u64) -> Self {
        self.update(url, |r| {
            r.failing_ranges.insert(start);
        })
    }

    /// Range requests starting at `start` deliver one chunk and then hang
    pub fn with_stalled_range(self, url: &str, start: u64) -> Self {
        self.update(url, |r| {
            r.stalled_ranges.insert(start);
        })
    }

    /// Range responses drop their final byte
    pub fn with_short_ranges(self, url: &str) -> Self {
        self.update(url, |r| r.short_ranges = true)
    }

    /// Delay applied before every GET response
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Total requests of any kind
    pub fn total_calls(&self) -> usize {
        self.head_calls() + self.get_calls() + self.send_calls()
    }

    /// Ranges requested so far, in arrival order
    pub fn requested_ranges(&self) -> Vec<ByteRange> {
        self.ranges.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Highest number of response bodies alive at the same time
    pub fn max_inflight(&self) -> usize {
        self.max_inflight.load(Ordering::SeqCst)
    }

    fn update(mut self, url: &str, f: impl FnOnce(&mut MockResource)) -> Self {
        if let Some(resource) = self.resources.get_mut(url) {
            f(resource);
        }
        self
    }

    fn not_found() -> Response {
        Response {
            status: StatusCode::NOT_FOUND,
            content_length: Some(0),
            body: stream::empty().boxed(),
        }
    }

    fn body_stream(&self, data: Bytes, stall: bool) -> BodyStream {
        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        let mut chunks: Vec<Result<Bytes>> = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk_size).min(data.len());
            chunks.push(Ok(data.slice(offset..end)));
            offset = end;
            if stall {
                break;
            }
        }

        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inflight.fetch_max(current, Ordering::SeqCst);
        let guard = InflightGuard(self.inflight.clone());

        let body = stream::iter(chunks).map(move |chunk| {
            let _guard = &guard;
            chunk
        });

        if stall {
            body.chain(stream::pending()).boxed()
        } else {
            body.boxed()
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn head(&self, url: &str) -> Result<HeadResponse> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);

        let Some(resource) = self.resources.get(url) else {
            return Ok(HeadResponse {
                status: StatusCode::NOT_FOUND,
                content_length: None,
            });
        };

        if resource.head_error {
            return Err(TransportError::RequestFailed(format!(
                "connection refused: {url}"
            )));
        }

        Ok(HeadResponse {
            status: resource.head_status,
            content_length: resource
                .advertise_length
                .then_some(resource.body.len() as u64),
        })
    }

    async fn get(&self, url: &str) -> Result<Response> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let Some(resource) = self.resources.get(url) else {
            return Ok(Self::not_found());
        };

        if !resource.get_status.is_success() {
            return Ok(Response {
                status: resource.get_status,
                content_length: Some(0),
                body: stream::empty().boxed(),
            });
        }

        Ok(Response {
            status: resource.get_status,
            content_length: Some(resource.body.len() as u64),
            body: self.body_stream(resource.body.clone(), false),
        })
    }

    async fn send(&self, request: Request, cancel: &CancellationToken) -> Result<Response> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(range) = request.range
            && let Ok(mut ranges) = self.ranges.lock()
        {
            ranges.push(range);
        }

        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.delay().await;

        let Some(resource) = self.resources.get(&request.url) else {
            return Ok(Self::not_found());
        };

        let Some(range) = request.range else {
            return Ok(Response {
                status: resource.get_status,
                content_length: Some(resource.body.len() as u64),
                body: self.body_stream(resource.body.clone(), false),
            });
        };

        if resource.failing_ranges.contains(&range.start) {
            return Err(TransportError::RequestFailed(format!(
                "connection reset while fetching {}",
                range.header_value()
            )));
        }

        if resource.range_status != StatusCode::PARTIAL_CONTENT {
            // Servers ignoring Range answer with the whole body
            return Ok(Response {
                status: resource.range_status,
                content_length: Some(resource.body.len() as u64),
                body: self.body_stream(resource.body.clone(), false),
            });
        }

        let len = resource.body.len() as u64;
        if range.start >= len {
            return Ok(Response {
                status: StatusCode::RANGE_NOT_SATISFIABLE,
                content_length: Some(0),
                body: stream::empty().boxed(),
            });
        }

        let end = range.end.min(len - 1);
        let mut slice = resource.body.slice(range.start as usize..=end as usize);
        if resource.short_ranges && !slice.is_empty() {
            slice.truncate(slice.len() - 1);
        }

        let stall = resource.stalled_ranges.contains(&range.start);
        Ok(Response {
            status: StatusCode::PARTIAL_CONTENT,
            content_length: Some(slice.len() as u64),
            body: self.body_stream(slice, stall),
        })
    }
}
