//! Immutable, time-partitioned segment files and their in-memory resources.
//!
//! A segment is sealed once, either by a flush or as the target of a compaction, and is
//! never modified afterwards. Deletions are recorded beside it in a tombstone journal.

pub mod file;
pub mod naming;
pub mod resource;

pub use file::{SegmentMeta, SegmentReader, SegmentWriter, SeriesIndex, SeriesIndexEntry};
pub use naming::SegmentName;
pub use resource::SegmentResource;

/// Timestamp in nanoseconds since the Unix epoch.
pub type Timestamp = i64;

/// Unique identifier of a segment within its storage group.
pub type SegmentId = u64;

/// Monotonic version assigned when a segment is sealed.
pub type Version = u64;

/// Closed time interval `[start, end]`.
///
/// A range with `start > end` is empty; it overlaps and contains nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// First covered timestamp.
    pub start: Timestamp,
    /// Last covered timestamp.
    pub end: Timestamp,
}

impl TimeRange {
    /// Creates the range `[start, end]`.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Range covering one timestamp.
    pub fn point(ts: Timestamp) -> Self {
        Self { start: ts, end: ts }
    }

    /// Range covering every timestamp.
    pub fn all() -> Self {
        Self {
            start: Timestamp::MIN,
            end: Timestamp::MAX,
        }
    }

    /// The empty range.
    pub fn empty() -> Self {
        Self {
            start: Timestamp::MAX,
            end: Timestamp::MIN,
        }
    }

    /// Returns true if the range covers no timestamp.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Returns true if `ts` lies in the range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Returns true if both ranges share at least one timestamp.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &TimeRange) -> TimeRange {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        TimeRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Lifecycle state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentStatus {
    /// Being written, not yet visible to queries.
    Open = 0,
    /// Sealed and live.
    Closed = 1,
    /// Sealed, live, and claimed as a compaction source.
    Compacting = 2,
    /// Replaced by a compaction target; removed once the last reference drops.
    Deleted = 3,
}

impl SegmentStatus {
    /// Creates a status from its `repr` value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Open),
            1 => Some(Self::Closed),
            2 => Some(Self::Compacting),
            3 => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_overlap() {
        let a = TimeRange::new(1, 10);
        assert!(a.overlaps(&TimeRange::new(10, 20)));
        assert!(!a.overlaps(&TimeRange::new(11, 20)));
        assert!(!a.overlaps(&TimeRange::empty()));
        assert!(TimeRange::all().overlaps(&a));
    }

    #[test]
    fn test_time_range_union_with_empty() {
        let a = TimeRange::new(5, 7);
        assert_eq!(TimeRange::empty().union(&a), a);
        assert_eq!(a.union(&TimeRange::new(1, 2)), TimeRange::new(1, 7));
        assert!(TimeRange::empty().is_empty());
        assert!(!TimeRange::point(3).is_empty());
    }
}
