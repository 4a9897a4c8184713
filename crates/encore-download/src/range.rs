//! Byte-range arithmetic for chunked downloads.

use std::fmt;

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Value for a `Range` request header (HTTP ranges are inclusive).
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Split `[offset, total)` into contiguous ranges of at most `chunk_size`
/// bytes. A zero `chunk_size` yields a single range.
pub fn partition(offset: u64, total: u64, chunk_size: u64) -> Vec<ByteRange> {
    if offset >= total {
        return Vec::new();
    }
    let chunk_size = if chunk_size == 0 { total - offset } else { chunk_size };
    let mut ranges = Vec::with_capacity(((total - offset) / chunk_size + 1) as usize);
    let mut start = offset;
    while start < total {
        let end = start.saturating_add(chunk_size).min(total);
        ranges.push(ByteRange { start, end });
        start = end;
    }
    ranges
}

/// Bytes at the front of `ranges` that are known to be on disk.
///
/// `written[i]` counts bytes written sequentially from `ranges[i].start`.
/// The prefix runs through every complete leading range plus whatever the
/// first incomplete range managed to write.
pub fn contiguous_prefix(ranges: &[ByteRange], written: &[u64]) -> u64 {
    let Some(first) = ranges.first() else {
        return 0;
    };
    let mut end = first.start;
    for (range, &done) in ranges.iter().zip(written) {
        let done = done.min(range.len());
        end = range.start + done;
        if done < range.len() {
            break;
        }
    }
    end
}

/// Parse a `Content-Range` value such as `bytes 0-0/1234` into
/// `(start, end_inclusive, total)`. The total is `None` for `*`.
pub fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, end, total))
}
