//! Segment planning: split `[0, size)` into contiguous byte ranges.
//!
//! Segment *i* (0-based) covers `start = i*part + min(1, i)` through
//! `end = min((i+1)*part, size)` where `part = ceil(size / count)`. `end` is
//! sent as the inclusive end of an HTTP range, so segment 0 carries one byte
//! more than the others and the last segment's `end` equals `size`, one past
//! the final byte; servers clamp that. Reassembly only looks at `start`.

use tracing::debug;

/// One planned byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    /// 1-based segment id in plan order.
    pub id: usize,
    /// First byte and file-seek offset.
    pub start: u64,
    /// Inclusive end as sent in `Range: bytes=start-end`.
    pub end: u64,
}

impl SegmentRange {
    /// Whether the range lies entirely past the last byte of a `size`-byte
    /// resource (only happens when there are more segments than bytes).
    #[must_use]
    pub fn is_beyond(&self, size: u64) -> bool {
        self.start >= size
    }

    /// Number of bytes the server will send for this range of a `size`-byte
    /// resource.
    #[must_use]
    pub fn expected_len(&self, size: u64) -> u64 {
        if self.is_beyond(size) {
            return 0;
        }
        let last = self.end.min(size.saturating_sub(1));
        last.saturating_sub(self.start) + 1
    }
}

/// Ordered list of segment ranges for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    size: u64,
    ranges: Vec<SegmentRange>,
}

impl SegmentPlan {
    /// Plans `segment_count` ranges over a `size`-byte resource.
    ///
    /// A `segment_count` of 0 is treated as 1.
    #[must_use]
    pub fn new(size: u64, segment_count: usize) -> Self {
        let count = segment_count.max(1) as u64;
        let part = size.div_ceil(count);

        let ranges = (0..count)
            .map(|i| SegmentRange {
                id: usize::try_from(i + 1).unwrap_or(usize::MAX),
                start: i * part + i.min(1),
                end: ((i + 1) * part).min(size),
            })
            .collect();

        let plan = Self { size, ranges };
        debug!(size, segments = plan.ranges.len(), part_size = part, "segment plan built");
        plan
    }

    /// All planned ranges in id order.
    #[must_use]
    pub fn ranges(&self) -> &[SegmentRange] {
        &self.ranges
    }

    /// Ranges that actually have bytes to fetch.
    pub fn fetchable(&self) -> impl Iterator<Item = &SegmentRange> {
        self.ranges.iter().filter(|range| !range.is_beyond(self.size))
    }

    /// Resource size the plan was built for.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// `(start, end)` pairs, mainly for logging and tests.
    #[must_use]
    pub fn bounds(&self) -> Vec<(u64, u64)> {
        self.ranges.iter().map(|r| (r.start, r.end)).collect()
    }
}
