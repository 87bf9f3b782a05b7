//! Points waiting to be sealed into a segment.

use crate::segment::{TimeRange, Timestamp};
use std::collections::BTreeMap;

/// Buffered points keyed by series path, then timestamp.
///
/// Inserting the same `(path, ts)` twice keeps the later value.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SegmentBatch {
    series: BTreeMap<String, BTreeMap<Timestamp, f64>>,
}

impl SegmentBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one point.
    pub fn insert(&mut self, path: impl Into<String>, ts: Timestamp, value: f64) {
        self.series.entry(path.into()).or_default().insert(ts, value);
    }

    /// Returns true if the batch holds no point.
    pub fn is_empty(&self) -> bool {
        self.series.values().all(BTreeMap::is_empty)
    }

    /// Total number of points.
    pub fn point_count(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    /// Buffered series.
    pub fn series(&self) -> &BTreeMap<String, BTreeMap<Timestamp, f64>> {
        &self.series
    }

    /// Time range of one buffered series.
    pub fn series_range(&self, path: &str) -> Option<TimeRange> {
        let points = self.series.get(path)?;
        let first = points.keys().next()?;
        let last = points.keys().next_back()?;
        Some(TimeRange::new(*first, *last))
    }
}

impl<S: Into<String>> FromIterator<(S, Timestamp, f64)> for SegmentBatch {
    fn from_iter<I: IntoIterator<Item = (S, Timestamp, f64)>>(iter: I) -> Self {
        let mut batch = SegmentBatch::new();
        for (path, ts, value) in iter {
            batch.insert(path, ts, value);
        }
        batch
    }
}
