//! Range planning: how many workers, and which bytes each one owns.

use std::path::{Path, PathBuf};

/// A contiguous byte span assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub index: usize,
    pub start: u64,
    pub len: u64,
}

impl ByteRange {
    /// Inclusive last byte, `None` for an empty span.
    pub fn end(&self) -> Option<u64> {
        if self.len == 0 {
            None
        } else {
            Some(self.start + self.len - 1)
        }
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> Option<String> {
        self.end()
            .map(|end| format!("bytes={}-{}", self.start, end))
    }
}

/// How a payload will be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangePlan {
    /// One whole-body request straight into the destination.
    Single,
    /// Parallel range requests, one part file each.
    Split(Vec<ByteRange>),
}

/// Partition `[0, size)` into `chunks` spans.
///
/// Span `i` covers `[i*size/chunks, (i+1)*size/chunks - 1]`; the last span always
/// ends at `size - 1` so the division remainder is never dropped.
pub fn split_ranges(size: u64, chunks: usize) -> Vec<ByteRange> {
    let n = chunks.max(1) as u128;
    let total = size as u128;

    (0..n)
        .map(|i| {
            let start = (i * total / n) as u64;
            let end_exclusive = if i == n - 1 {
                size
            } else {
                ((i + 1) * total / n) as u64
            };
            ByteRange {
                index: i as usize,
                start,
                len: end_exclusive - start,
            }
        })
        .collect()
}

/// Decide between a single request and a split download.
///
/// `requested` is clamped to `max_chunks`; splitting only pays off when every
/// part is at least `min_split_size` bytes.
pub fn plan_ranges(size: u64, requested: usize, max_chunks: usize, min_split_size: u64) -> RangePlan {
    let chunks = requested.min(max_chunks.max(1));
    if chunks <= 1 || size < (chunks as u64).saturating_mul(min_split_size) {
        return RangePlan::Single;
    }
    RangePlan::Split(split_ranges(size, chunks))
}

/// Output path for part `index` of `dest`: `<dest>.part<index>`.
pub fn part_path(dest: &Path, index: usize) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(format!(".part{}", index));
    PathBuf::from(name)
}
