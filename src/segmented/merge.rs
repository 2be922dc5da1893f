//! Ordered concatenation of part files

use crate::paths::part_path;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Copy buffer used when the caller does not pick one
pub const DEFAULT_COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("part {index} is missing ({path}): {source}")]
    MissingPart {
        index: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("part {index} is unreadable ({path}): {source}")]
    UnreadablePart {
        index: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}{}: {source}", part_suffix(.index))]
    WriteFailed {
        path: PathBuf,
        index: Option<usize>,
        #[source]
        source: io::Error,
    },
}

fn part_suffix(index: &Option<usize>) -> String {
    index.map(|i| format!(" while copying part {i}")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// Concatenate `<destination>.part0 .. part<count-1>` into `destination`
///
/// See [`merge_parts_buffered`].
pub async fn merge_parts(destination: &Path, segment_count: usize) -> Result<u64> {
    merge_parts_buffered(destination, segment_count, DEFAULT_COPY_BUFFER).await
}

/// Concatenate part files in ascending index order, deleting each one once copied
///
/// Every part must exist before the destination is truncated. Failures after
/// that point leave the destination partially written and already-consumed
/// parts deleted; such a destination is unusable and the transfer must be
/// redone from scratch. Returns the number of bytes written.
pub async fn merge_parts_buffered(
    destination: &Path,
    segment_count: usize,
    buffer_size: usize,
) -> Result<u64> {
    for index in 0..segment_count {
        let path = part_path(destination, index);
        if let Err(source) = fs::metadata(&path).await {
            return Err(MergeError::MissingPart {
                index,
                path,
                source,
            });
        }
    }

    let file = File::create(destination)
        .await
        .map_err(|source| MergeError::WriteFailed {
            path: destination.to_path_buf(),
            index: None,
            source,
        })?;
    let mut writer = BufWriter::with_capacity(buffer_size.max(1), file);
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    for index in 0..segment_count {
        let path = part_path(destination, index);
        let mut part = File::open(&path)
            .await
            .map_err(|source| MergeError::MissingPart {
                index,
                path: path.clone(),
                source,
            })?;

        let write_failed = |source| MergeError::WriteFailed {
            path: destination.to_path_buf(),
            index: Some(index),
            source,
        };

        let mut copied = 0u64;
        loop {
            let n = part
                .read(&mut buffer)
                .await
                .map_err(|source| MergeError::UnreadablePart {
                    index,
                    path: path.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n]).await.map_err(write_failed)?;
            copied += n as u64;
        }
        writer.flush().await.map_err(write_failed)?;
        drop(part);

        if let Err(e) = fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "Failed to delete merged part");
        }

        debug!(index, bytes = copied, "Merged part");
        total += copied;
    }

    writer
        .flush()
        .await
        .map_err(|source| MergeError::WriteFailed {
            path: destination.to_path_buf(),
            index: None,
            source,
        })?;

    Ok(total)
}
