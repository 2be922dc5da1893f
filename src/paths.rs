//! File naming and destination checks

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

const FALLBACK_FILE_NAME: &str = "download.bin";
const STAGING_SUFFIX: &str = "download";
const PROBE_PREFIX: &str = ".parafetch_write_check_";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("Directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("No write permission for directory {path}: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Last path segment of `url`, ignoring query and fragment
///
/// Falls back to `download.bin` when the URL has no usable name.
pub fn file_name_from_url(url: &str) -> String {
    let name = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .unwrap_or_default(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_string(),
    };

    if name.is_empty() || name == "." || name == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        name
    }
}

/// `<destination>.part<index>`, zero-based
pub fn part_path(destination: &Path, index: usize) -> PathBuf {
    with_suffix(destination, &format!("part{index}"))
}

/// Temporary file a batch job streams into before the final rename
pub fn staging_path(destination: &Path) -> PathBuf {
    with_suffix(destination, STAGING_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".");
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Ensure `dir` exists and accepts new files
pub async fn validate_directory(dir: &Path) -> Result<(), PathError> {
    let metadata = tokio::fs::metadata(dir)
        .await
        .map_err(|_| PathError::MissingDirectory(dir.to_path_buf()))?;

    if !metadata.is_dir() {
        return Err(PathError::NotADirectory(dir.to_path_buf()));
    }

    let probe = dir.join(format!("{PROBE_PREFIX}{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::File::create(&probe)
        .await
        .map_err(|source| PathError::NotWritable {
            path: dir.to_path_buf(),
            source,
        })?;

    if let Err(e) = tokio::fs::remove_file(&probe).await {
        tracing::warn!(path = %probe.display(), error = %e, "Failed to remove write probe");
    }

    Ok(())
}
