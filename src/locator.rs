//! Sources of URLs to fetch

use tracing::warn;
use url::Url;

/// Produces the ordered set of URLs for a batch
pub trait UrlProvider: Send + Sync {
    fn urls(&self) -> Vec<String>;
}

/// Fixed list of URLs, typically from repeated `--url` flags
///
/// Invalid entries are dropped with a warning; order is preserved.
#[derive(Debug, Clone, Default)]
pub struct StaticUrlProvider {
    urls: Vec<String>,
}

impl StaticUrlProvider {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }
}

impl UrlProvider for StaticUrlProvider {
    fn urls(&self) -> Vec<String> {
        self.urls
            .iter()
            .filter(|url| {
                let valid = is_valid_url(url);
                if !valid {
                    warn!(url = %url, "Skipping invalid URL");
                }
                valid
            })
            .cloned()
            .collect()
    }
}

/// A URL needs a scheme and a host
pub fn is_valid_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => !url.scheme().is_empty() && url.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}
