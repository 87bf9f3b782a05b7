//! Query snapshots.
//!
//! A snapshot pins the segment handles and tombstones that were live when it was
//! taken. Compactions publishing afterwards do not change what it reads, and the
//! source files it references stay on disk until it is dropped.

use crate::error::Result;
use crate::query::Filter;
use crate::segment::{SegmentResource, Timestamp, Version};
use crate::tombstone::Tombstone;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Consistent view of one storage group for a set of series.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub(crate) group: String,
    pub(crate) paths: BTreeSet<String>,
    pub(crate) version: Version,
    pub(crate) segments: Vec<Arc<SegmentResource>>,
    pub(crate) tombstones: HashMap<String, Vec<Tombstone>>,
    pub(crate) ttl_lower_bound: Option<Timestamp>,
}

impl QuerySnapshot {
    /// Name of the captured group.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Series the snapshot was taken for.
    pub fn paths(&self) -> &BTreeSet<String> {
        &self.paths
    }

    /// Highest segment version published when the snapshot was taken.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Captured segments.
    pub fn segments(&self) -> &[Arc<SegmentResource>] {
        &self.segments
    }

    /// Tombstones affecting `path`, deduplicated.
    pub fn tombstones_for(&self, path: &str) -> &[Tombstone] {
        self.tombstones.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Oldest timestamp still visible under the group's TTL.
    pub fn ttl_lower_bound(&self) -> Option<Timestamp> {
        self.ttl_lower_bound
    }

    /// Everything a reader of `path` needs from this snapshot.
    pub fn series_view(&self, path: &str) -> SeriesView {
        SeriesView {
            path: path.to_string(),
            segments: self
                .segments
                .iter()
                .filter(|s| s.contains_series(path))
                .cloned()
                .collect(),
            tombstones: self.tombstones_for(path).to_vec(),
            ttl_lower_bound: self.ttl_lower_bound,
        }
    }
}

/// Segments and tombstones of a single series.
#[derive(Debug, Clone, Default)]
pub struct SeriesView {
    /// Series path.
    pub path: String,
    /// Segments holding the series.
    pub segments: Vec<Arc<SegmentResource>>,
    /// Tombstones selecting the series.
    pub tombstones: Vec<Tombstone>,
    /// Oldest visible timestamp, if the group has a TTL.
    pub ttl_lower_bound: Option<Timestamp>,
}

/// Snapshots of one or more groups, addressed by series path.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSet {
    snapshots: Vec<QuerySnapshot>,
    routes: HashMap<String, usize>,
}

impl SnapshotSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a snapshot and routes its paths to it.
    pub fn insert(&mut self, snapshot: QuerySnapshot) {
        let slot = self.snapshots.len();
        for path in &snapshot.paths {
            self.routes.insert(path.clone(), slot);
        }
        self.snapshots.push(snapshot);
    }

    /// Captured snapshots.
    pub fn snapshots(&self) -> &[QuerySnapshot] {
        &self.snapshots
    }

    /// Snapshot covering `path`.
    pub fn snapshot_for(&self, path: &str) -> Option<&QuerySnapshot> {
        self.routes.get(path).map(|&slot| &self.snapshots[slot])
    }

    /// View of `path`; empty if no captured group holds it.
    pub fn series_view(&self, path: &str) -> SeriesView {
        match self.snapshot_for(path) {
            Some(snapshot) => snapshot.series_view(path),
            None => SeriesView {
                path: path.to_string(),
                ..SeriesView::default()
            },
        }
    }
}

impl From<QuerySnapshot> for SnapshotSet {
    fn from(snapshot: QuerySnapshot) -> Self {
        let mut set = SnapshotSet::new();
        set.insert(snapshot);
        set
    }
}

/// Anything that can capture snapshots for a set of series.
pub trait SnapshotSource {
    /// Captures snapshots covering `paths`. Segments the time filter rules out may be
    /// left out.
    fn acquire_snapshots(
        &self,
        paths: &BTreeSet<String>,
        time_filter: Option<&Filter>,
    ) -> Result<SnapshotSet>;
}
