use super::models::Config;
use crate::segmented::{MAX_SEGMENTS, MIN_SEGMENTS};
use thiserror::Error;

const MAX_REDIRECT_LIMIT: usize = 32;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("download.segments must be between 1 and 6, got {0}")]
    InvalidSegmentCount(u8),

    #[error("download.threads must be at least 1")]
    InvalidThreadCount,

    #[error("download.buffer_size must be positive")]
    InvalidBufferSize,

    #[error("http.user_agent must not be empty")]
    EmptyUserAgent,

    #[error("http.max_redirects ({actual}) exceeds limit of {limit}")]
    TooManyRedirects { actual: usize, limit: usize },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_download(config)?;
    validate_http(config)?;
    Ok(())
}

fn validate_download(config: &Config) -> Result<(), ValidationError> {
    let download = &config.download;

    if !(MIN_SEGMENTS..=MAX_SEGMENTS).contains(&download.segments) {
        return Err(ValidationError::InvalidSegmentCount(download.segments));
    }

    if download.threads == 0 {
        return Err(ValidationError::InvalidThreadCount);
    }

    if download.buffer_size.as_u64() == 0 {
        return Err(ValidationError::InvalidBufferSize);
    }

    Ok(())
}

fn validate_http(config: &Config) -> Result<(), ValidationError> {
    if config.http.user_agent.trim().is_empty() {
        return Err(ValidationError::EmptyUserAgent);
    }

    if config.http.max_redirects > MAX_REDIRECT_LIMIT {
        return Err(ValidationError::TooManyRedirects {
            actual: config.http.max_redirects,
            limit: MAX_REDIRECT_LIMIT,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_segment_bounds() {
        let mut config = Config::default();

        for segments in [0u8, 7] {
            config.download.segments = segments;
            assert!(matches!(
                validate(&config),
                Err(ValidationError::InvalidSegmentCount(s)) if s == segments
            ));
        }

        for segments in MIN_SEGMENTS..=MAX_SEGMENTS {
            config.download.segments = segments;
            assert!(validate(&config).is_ok());
        }
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut config = Config::default();
        config.download.threads = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidThreadCount)
        ));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let mut config = Config::default();
        config.download.buffer_size = ByteSize(0);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidBufferSize)
        ));
    }

    #[test]
    fn test_http_settings_checked() {
        let mut config = Config::default();
        config.http.user_agent = "  ".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyUserAgent)
        ));

        let mut config = Config::default();
        config.http.max_redirects = 100;
        let err = validate(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "http.max_redirects (100) exceeds limit of 32"
        );
    }
}
