//! Transport capability consumed by the download engines
//!
//! The batch coordinator and the segmented engine only reach the network
//! through [`Transport`]. [`HttpClient`] is the production implementation;
//! [`mock::MockTransport`] serves canned resources for tests.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use http::{HttpClient, HttpConfig};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("Failed to read body: {0}")]
    Body(String),

    #[error("Request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Response body as a stream of chunks
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// Inclusive byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered (both ends inclusive)
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Generic GET request, optionally restricted to a byte range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub range: Option<ByteRange>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            range: None,
        }
    }

    pub fn ranged(url: impl Into<String>, range: ByteRange) -> Self {
        Self {
            url: url.into(),
            range: Some(range),
        }
    }
}

/// Result of a HEAD request
#[derive(Debug, Clone, Copy)]
pub struct HeadResponse {
    pub status: StatusCode,
    pub content_length: Option<u64>,
}

impl HeadResponse {
    pub fn status_line(&self) -> String {
        status_line(self.status)
    }
}

/// Streaming response; the body is not buffered
pub struct Response {
    pub status: StatusCode,
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl Response {
    pub fn status_line(&self) -> String {
        status_line(self.status)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Render a status the way servers print it, e.g. `404 Not Found`
pub fn status_line(status: StatusCode) -> String {
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}

/// Network capability shared by every fetch strategy
///
/// Implementations own connection pooling and redirects. Callers never
/// retry beneath this boundary.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a HEAD request
    async fn head(&self, url: &str) -> Result<HeadResponse>;

    /// Issue a plain GET request
    async fn get(&self, url: &str) -> Result<Response>;

    /// Issue a request bound to a cancellation token
    ///
    /// Returns [`TransportError::Cancelled`] if the token fires before the
    /// response headers arrive.
    async fn send(&self, request: Request, cancel: &CancellationToken) -> Result<Response>;
}
