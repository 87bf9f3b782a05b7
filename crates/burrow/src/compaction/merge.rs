//! Merging of source segments into one target file.

use crate::config::SyncMode;
use crate::error::Result;
use crate::segment::file::{SegmentMeta, SegmentWriter};
use crate::segment::{SegmentResource, Timestamp, Version};
use crate::tombstone::Tombstone;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// A source segment and the tombstones the merge applies to it.
#[derive(Debug, Clone)]
pub struct MergeSource {
    /// Source segment.
    pub segment: Arc<SegmentResource>,
    /// Tombstones to apply.
    pub tombstones: Vec<Tombstone>,
}

/// Counters of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Series written to the target.
    pub series_written: u64,
    /// Points written to the target.
    pub points_written: u64,
    /// Points dropped because a newer source held the same timestamp.
    pub duplicates_resolved: u64,
    /// Points dropped by tombstones.
    pub points_deleted: u64,
}

/// Writes the merge of `sources` to `target`.
///
/// Every series of every source is copied once. At a shared timestamp the point of
/// the segment with the higher version wins, and points deleted by any source's
/// tombstones are left out. The result depends only on the inputs, so running it
/// twice produces identical files.
pub fn merge_segments(
    sources: &[MergeSource],
    target: &Path,
    meta: SegmentMeta,
    sync_mode: SyncMode,
) -> Result<MergeStats> {
    let mut tombstones: Vec<&Tombstone> = Vec::new();
    for tombstone in sources.iter().flat_map(|s| s.tombstones.iter()) {
        if !tombstones.contains(&tombstone) {
            tombstones.push(tombstone);
        }
    }
    let paths: BTreeSet<&str> = sources
        .iter()
        .flat_map(|s| s.segment.index().iter().map(|e| e.path.as_str()))
        .collect();

    let mut stats = MergeStats::default();
    let mut writer = SegmentWriter::new(target, meta, sync_mode)?;
    for path in paths {
        let selecting: Vec<&Tombstone> = tombstones
            .iter()
            .copied()
            .filter(|t| t.pattern.matches(path))
            .collect();

        let mut merged: BTreeMap<Timestamp, (Version, u64, f64)> = BTreeMap::new();
        for source in sources {
            let Some(points) = source.segment.read_series(path)? else {
                continue;
            };
            let rank = (source.segment.version(), source.segment.id());
            for (ts, value) in points {
                if selecting.iter().any(|t| t.deletes(ts, rank.0)) {
                    stats.points_deleted += 1;
                    continue;
                }
                match merged.entry(ts) {
                    Entry::Vacant(slot) => {
                        slot.insert((rank.0, rank.1, value));
                    }
                    Entry::Occupied(mut slot) => {
                        stats.duplicates_resolved += 1;
                        let (version, id, _) = *slot.get();
                        if rank > (version, id) {
                            slot.insert((rank.0, rank.1, value));
                        }
                    }
                }
            }
        }

        if merged.is_empty() {
            continue;
        }
        let points: BTreeMap<Timestamp, f64> =
            merged.into_iter().map(|(ts, (_, _, v))| (ts, v)).collect();
        stats.points_written += points.len() as u64;
        stats.series_written += 1;
        writer.write_series(path, &points)?;
    }
    writer.finish()?;
    Ok(stats)
}
