//! reqwest-backed transport

use super::{BodyStream, HeadResponse, Request, Response, Result, Transport, TransportError};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, RANGE};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Overall per-request deadline; `None` leaves long transfers unbounded
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            user_agent: format!("parafetch/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
        }
    }
}

/// HTTP transport
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));

        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;

        Ok(Self { client })
    }

    fn into_response(response: reqwest::Response) -> Response {
        let status = response.status();
        let content_length = response.content_length();
        let body: BodyStream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Body(e.to_string())))
            .boxed();

        Response {
            status,
            content_length,
            body,
        }
    }
}

/// Content-Length read from the header itself; reqwest reports the body
/// size hint, which is zero for HEAD responses.
fn header_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn map_send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_redirect() {
        TransportError::TooManyRedirects
    } else if e.is_builder() {
        TransportError::InvalidUrl(e.to_string())
    } else {
        TransportError::RequestFailed(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn head(&self, url: &str) -> Result<HeadResponse> {
        debug!(url, "HEAD");

        let response = self.client.head(url).send().await.map_err(map_send_error)?;

        Ok(HeadResponse {
            status: response.status(),
            content_length: header_content_length(response.headers()),
        })
    }

    async fn get(&self, url: &str) -> Result<Response> {
        debug!(url, "GET");

        let response = self.client.get(url).send().await.map_err(map_send_error)?;
        Ok(Self::into_response(response))
    }

    async fn send(&self, request: Request, cancel: &CancellationToken) -> Result<Response> {
        let mut builder = self.client.get(&request.url);
        if let Some(range) = request.range {
            debug!(url = %request.url, range = %range.header_value(), "GET range");
            builder = builder.header(RANGE, range.header_value());
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            sent = builder.send() => sent.map_err(map_send_error)?,
        };

        Ok(Self::into_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.max_redirects, 10);
        assert!(config.user_agent.starts_with("parafetch/"));
    }

    #[test]
    fn test_header_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_content_length(&headers), None);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("900"));
        assert_eq!(header_content_length(&headers), Some(900));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("nine hundred"));
        assert_eq!(header_content_length(&headers), None);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let client = HttpClient::new(HttpConfig::default()).unwrap();
        let result = client.head("not a url").await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_send_honours_cancelled_token() {
        let client = HttpClient::new(HttpConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Unroutable address: only the token can resolve the select quickly
        let request = Request::get("http://10.255.255.1:81/file.bin");
        let result = client.send(request, &cancel).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
