use crate::paths::part_path;
use crate::transport::ByteRange;
use std::path::{Path, PathBuf};

/// Smallest accepted segment count
pub const MIN_SEGMENTS: u8 = 1;
/// Largest accepted segment count
pub const MAX_SEGMENTS: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Succeeded,
    Failed,
}

/// One contiguous byte range of the resource and the part file holding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub start: u64,
    /// Inclusive
    pub end: u64,
    pub part_path: PathBuf,
    pub status: SegmentStatus,
}

impl Segment {
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.start, self.end)
    }

    /// Bytes this segment must deliver
    pub fn expected_len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Split `size` bytes into at most `count` ranges of `ceil(size / count)` bytes
///
/// The last range ends at `size - 1`. Ranges that would start past the end
/// are not produced, so a small resource can yield fewer segments than
/// requested. An empty resource yields none.
pub fn plan_segments(size: u64, count: u8, destination: &Path) -> Vec<Segment> {
    if size == 0 || count == 0 {
        return Vec::new();
    }

    let chunk = size.div_ceil(u64::from(count));

    (0..u64::from(count))
        .map(|i| i * chunk)
        .take_while(|start| *start < size)
        .enumerate()
        .map(|(index, start)| Segment {
            index,
            start,
            end: (start + chunk - 1).min(size - 1),
            part_path: part_path(destination, index),
            status: SegmentStatus::Pending,
        })
        .collect()
}
