//! Part planning
//!
//! Chooses the part size for a multipart transfer so the provider's part-count
//! ceiling is never exceeded, and partitions known sizes into byte ranges.

use std::sync::atomic::{AtomicBool, Ordering};

use cloudsync_core::domain::ByteRange;
use tracing::warn;

const MIB: u64 = 1024 * 1024;

/// Set once the streaming size limit has been logged in this process
static STREAM_LIMIT_WARNED: AtomicBool = AtomicBool::new(false);

/// Part layout for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    /// Size of every part except possibly the last
    pub part_size: u64,
    /// Number of parts, known only when the object size is known
    pub part_count: Option<u64>,
    /// Largest object this plan can carry: `part_size * max_parts`
    pub max_size: u64,
}

/// Plan the part size for an object of `size` bytes (`None` when streaming)
///
/// For unknown sizes the configured chunk size is used as is and the stream
/// may not exceed `max_size`. For known sizes the chunk size is scaled up to
/// the next whole MiB that keeps the part count within `max_parts`. The result
/// is never below `min_chunk_size`.
pub fn plan_parts(size: Option<u64>, chunk_size: u64, max_parts: u32, min_chunk_size: u64) -> PartPlan {
    let max_parts = u64::from(max_parts.max(1));
    let chunk = chunk_size.max(min_chunk_size).max(1);

    match size {
        None => {
            let max_size = chunk.saturating_mul(max_parts);
            if !STREAM_LIMIT_WARNED.swap(true, Ordering::Relaxed) {
                warn!(
                    chunk_size = chunk,
                    max_parts,
                    max_size,
                    "Streaming uploads are limited to chunk_size * max_parts bytes"
                );
            }
            PartPlan {
                part_size: chunk,
                part_count: None,
                max_size,
            }
        }
        Some(size) => {
            let part_size = if size <= chunk.saturating_mul(max_parts) {
                chunk
            } else {
                ((size / max_parts) / MIB + 1) * MIB
            };
            PartPlan {
                part_size,
                part_count: Some(part_count(size, part_size)),
                max_size: part_size.saturating_mul(max_parts),
            }
        }
    }
}

/// Number of parts needed for `size` bytes; an empty object still takes one
pub fn part_count(size: u64, part_size: u64) -> u64 {
    if size == 0 {
        return 1;
    }
    size.div_ceil(part_size.max(1))
}

/// Split `[0, size)` into consecutive ranges of `part_size` bytes
///
/// The last range holds the remainder and may be shorter.
pub fn byte_ranges(size: u64, part_size: u64) -> Vec<ByteRange> {
    let part_size = part_size.max(1);
    let mut ranges = Vec::with_capacity(usize::try_from(part_count(size, part_size)).unwrap_or(0));
    let mut start = 0;
    while start < size {
        let len = part_size.min(size - start);
        ranges.push(ByteRange::with_len(start, len));
        start += len;
    }
    ranges
}

/// Returns true once a streaming plan has logged its size limit
pub fn stream_limit_warned() -> bool {
    STREAM_LIMIT_WARNED.load(Ordering::Relaxed)
}
