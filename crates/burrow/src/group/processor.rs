//! Storage group processor.
//!
//! ## Locking
//!
//! - `segments` is the merge lock. Readers copy the live list under its read side;
//!   flushes and compaction publishes swap it under the write side. Nothing performs
//!   I/O while holding it.
//! - `deletion_gate` serializes deletions against the claim and the publish of a
//!   compaction, so a tombstone is either seen by the merge or issued late enough to be
//!   carried over to the target. It is always taken before `segments`.
//! - Tombstones become visible to queries under the write side of `segments`, all
//!   segments of one deletion at once; snapshots copy them under the read side.
//! - `flush_state` serializes flushes so versions are published in order.
//! - `compaction_token` allows one compaction per group at a time.

use crate::compaction::recovery::recover_group_dir;
use crate::config::GroupConfig;
use crate::error::{BurrowError, Result};
use crate::group::batch::SegmentBatch;
use crate::group::snapshot::{QuerySnapshot, SnapshotSet, SnapshotSource};
use crate::query::Filter;
use crate::segment::file::{promote_temp, SegmentMeta, SegmentWriter};
use crate::segment::naming::{list_segment_files, list_with_suffix, temp_path, SegmentName, TEMP_SUFFIX};
use crate::segment::{SegmentId, SegmentResource, SegmentStatus, TimeRange, Timestamp, Version};
use crate::tombstone::{PathPattern, Tombstone};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

struct SegmentSet {
    segments: Vec<Arc<SegmentResource>>,
    published_version: Version,
}

struct FlushState {
    next_version: Version,
    last_flush_time: HashMap<String, Timestamp>,
}

/// A compaction source together with the number of its tombstones the merge applied.
#[derive(Debug, Clone)]
pub struct CompactionSource {
    /// Source segment.
    pub segment: Arc<SegmentResource>,
    /// Tombstones `[0, watermark)` were applied by the merge; later ones were not.
    pub tombstone_watermark: usize,
}

/// Owner of one storage group directory.
pub struct StorageGroupProcessor {
    name: String,
    dir: PathBuf,
    config: GroupConfig,
    segments: RwLock<SegmentSet>,
    deletion_gate: Mutex<()>,
    flush_state: Mutex<FlushState>,
    next_segment_id: AtomicU64,
    compaction_token: Mutex<()>,
}

impl StorageGroupProcessor {
    /// Opens the group stored in `dir`, creating the directory if needed.
    ///
    /// Interrupted compactions are resolved first, stray temporary files are removed,
    /// then every sealed segment is loaded with its tombstones.
    pub fn open(name: impl Into<String>, dir: impl Into<PathBuf>, config: GroupConfig) -> Result<Self> {
        let name = name.into();
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let report = recover_group_dir(&dir, config.sync_mode)?;
        if !report.is_empty() {
            info!("Recovered compactions in group {}: {:?}", name, report);
        }

        for stray in list_with_suffix(&dir, TEMP_SUFFIX)? {
            warn!("Removing unfinished segment {:?}", stray);
            fs::remove_file(&stray)?;
        }

        let mut segments = Vec::new();
        let mut next_id: SegmentId = 1;
        let mut published_version: Version = 0;
        let mut last_flush_time: HashMap<String, Timestamp> = HashMap::new();
        for (segment_name, path) in list_segment_files(&dir)? {
            let segment = SegmentResource::open(&path, config.sync_mode)?;
            next_id = next_id.max(segment_name.id + 1);
            published_version = published_version.max(segment.version());
            if segment.is_sequence() {
                for entry in segment.index().iter() {
                    let last = last_flush_time.entry(entry.path.clone()).or_insert(Timestamp::MIN);
                    *last = (*last).max(entry.max_timestamp);
                }
            }
            segments.push(Arc::new(segment));
        }
        segments.sort_by_key(|s| (s.version(), s.id()));

        info!(
            "Opened storage group {} with {} segments at version {}",
            name,
            segments.len(),
            published_version
        );

        Ok(Self {
            name,
            dir,
            config,
            segments: RwLock::new(SegmentSet {
                segments,
                published_version,
            }),
            deletion_gate: Mutex::new(()),
            flush_state: Mutex::new(FlushState {
                next_version: published_version + 1,
                last_flush_time,
            }),
            next_segment_id: AtomicU64::new(next_id),
            compaction_token: Mutex::new(()),
        })
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Group configuration.
    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Copy of the live segment list.
    pub fn segments(&self) -> Vec<Arc<SegmentResource>> {
        self.segments.read().segments.clone()
    }

    /// Highest published segment version, 0 for an empty group.
    pub fn published_version(&self) -> Version {
        self.segments.read().published_version
    }

    /// Reserves a fresh segment id.
    pub fn allocate_segment_id(&self) -> SegmentId {
        self.next_segment_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Attempts to become this group's single compactor.
    pub fn try_compaction_token(&self) -> Option<MutexGuard<'_, ()>> {
        self.compaction_token.try_lock()
    }

    /// Claims `candidates` as compaction sources and records each one's tombstone
    /// watermark.
    ///
    /// Runs under the deletion gate, so no deletion is halfway through its appends.
    /// Any tombstone that reaches a source later was issued at a version no older than
    /// the sources. Returns `None`, with every claim released, if a candidate is not
    /// Closed.
    pub fn claim_compaction_sources(
        &self,
        candidates: &[Arc<SegmentResource>],
    ) -> Option<Vec<CompactionSource>> {
        let _gate = self.deletion_gate.lock();
        let mut claimed: Vec<CompactionSource> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !candidate.try_begin_compaction() {
                for source in &claimed {
                    source.segment.end_compaction();
                }
                return None;
            }
            claimed.push(CompactionSource {
                segment: Arc::clone(candidate),
                tombstone_watermark: candidate.tombstone_count(),
            });
        }
        Some(claimed)
    }

    /// Seals `batch` as a new segment and publishes it.
    ///
    /// The segment is classified as sequence when every series starts after the last
    /// point previously flushed to a sequence segment; otherwise it is unsequence.
    /// Returns `None` for an empty batch.
    pub fn flush(&self, batch: SegmentBatch) -> Result<Option<Arc<SegmentResource>>> {
        if batch.is_empty() {
            return Ok(None);
        }

        let mut state = self.flush_state.lock();
        let sequence = batch.series().iter().all(|(path, points)| {
            match (state.last_flush_time.get(path), points.keys().next()) {
                (Some(last), Some(first)) => first > last,
                _ => true,
            }
        });
        let meta = SegmentMeta {
            version: state.next_version,
            level: 0,
            sequence,
        };
        let path = SegmentName::new(self.allocate_segment_id(), meta).path_in(&self.dir);
        let temp = temp_path(&path);

        let sealed = write_batch(&temp, meta, &batch, &self.config)
            .and_then(|()| promote_temp(&temp, &path, self.config.sync_mode))
            .and_then(|()| SegmentResource::open(&path, self.config.sync_mode));
        let segment = match sealed {
            Ok(segment) => Arc::new(segment),
            Err(e) => {
                let _ = fs::remove_file(&temp);
                let _ = fs::remove_file(&path);
                warn!("Flush of group {} failed: {}", self.name, e);
                return Err(e);
            }
        };

        state.next_version += 1;
        if sequence {
            for (series, points) in batch.series() {
                if let Some(last) = points.keys().next_back() {
                    state.last_flush_time.insert(series.clone(), *last);
                }
            }
        }
        {
            let mut set = self.segments.write();
            set.segments.push(Arc::clone(&segment));
            set.published_version = meta.version;
        }

        info!(
            "Flushed {} points of group {} into {} ({})",
            batch.point_count(),
            self.name,
            segment.file_name(),
            if sequence { "sequence" } else { "unsequence" }
        );
        Ok(Some(segment))
    }

    /// Deletes points of series matching `pattern` inside `range`.
    ///
    /// A tombstone stamped with the current published version is journaled beside
    /// every live segment that may hold matching points, then attached to all of them
    /// in one step. Returns the number of segments it was attached to.
    ///
    /// # Errors
    ///
    /// A journal failure is returned. Segments journaled before the failure keep the
    /// tombstone, as they would after a restart.
    pub fn delete(&self, pattern: &PathPattern, range: TimeRange) -> Result<usize> {
        if range.is_empty() {
            return Ok(0);
        }

        let _gate = self.deletion_gate.lock();
        let (segments, version) = {
            let set = self.segments.read();
            (set.segments.clone(), set.published_version)
        };
        let tombstone = Tombstone::new(pattern.clone(), range, version);

        let mut journaled = Vec::new();
        let mut failure = None;
        for segment in segments.iter().filter(|s| {
            s.status() != SegmentStatus::Deleted
                && s.time_range().overlaps(&range)
                && s.contains_match(pattern)
        }) {
            if let Err(e) = segment.journal_tombstone(&tombstone) {
                failure = Some(e);
                break;
            }
            journaled.push(segment);
        }
        {
            let _published = self.segments.write();
            for segment in &journaled {
                segment.attach_tombstone(tombstone.clone());
            }
        }
        let attached = journaled.len();
        if let Some(e) = failure {
            warn!(
                "Delete of {} in group {} stopped after {} segments: {}",
                pattern, self.name, attached, e
            );
            return Err(e);
        }

        info!(
            "Deleted {} [{}, {}] in group {} at version {} ({} segments)",
            pattern, range.start, range.end, self.name, version, attached
        );
        Ok(attached)
    }

    /// Captures a snapshot for `paths`.
    pub fn acquire_snapshot<I, S>(&self, paths: I) -> Result<QuerySnapshot>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: BTreeSet<String> = paths.into_iter().map(Into::into).collect();
        self.acquire_snapshot_with_filter(&paths, None)
    }

    /// Captures a snapshot for `paths`, leaving out segments whose series ranges the
    /// time filter rules out. Tombstones are gathered from every segment holding a
    /// requested series.
    pub fn acquire_snapshot_with_filter(
        &self,
        paths: &BTreeSet<String>,
        time_filter: Option<&Filter>,
    ) -> Result<QuerySnapshot> {
        let mut segments = Vec::new();
        let mut tombstones: HashMap<String, Vec<Tombstone>> = HashMap::new();
        let set = self.segments.read();
        let version = set.published_version;
        for segment in &set.segments {
            let mut keep = false;
            for path in paths {
                let Some(range) = segment.series_range(path) else {
                    continue;
                };
                let entry = tombstones.entry(path.clone()).or_default();
                for tombstone in segment.tombstones_for(path) {
                    if !entry.contains(&tombstone) {
                        entry.push(tombstone);
                    }
                }
                keep |= time_filter.map_or(true, |f| f.may_overlap(&range));
            }
            if keep {
                segments.push(Arc::clone(segment));
            }
        }
        let live = set.segments.len();
        drop(set);

        debug!(
            "Snapshot of group {} at version {}: {} of {} segments for {} series",
            self.name,
            version,
            segments.len(),
            live,
            paths.len()
        );
        Ok(QuerySnapshot {
            group: self.name.clone(),
            paths: paths.clone(),
            version,
            segments,
            tombstones,
            ttl_lower_bound: self.ttl_lower_bound(),
        })
    }

    /// Replaces `sources` with `target` in the live list.
    ///
    /// Tombstones appended to a source after its watermark were not applied by the
    /// merge; they are journaled beside the target first. Returns how many tombstones
    /// were carried over.
    ///
    /// # Errors
    ///
    /// Fails without changing the live list if a source is no longer live, if a
    /// tombstone to carry over is older than the target's version (the target could
    /// not express it), or if a journal append fails.
    pub fn publish_compaction_result(
        &self,
        sources: &[CompactionSource],
        target: Arc<SegmentResource>,
    ) -> Result<usize> {
        let _gate = self.deletion_gate.lock();

        let source_ids: HashSet<SegmentId> = sources.iter().map(|s| s.segment.id()).collect();
        {
            let set = self.segments.read();
            let live = set
                .segments
                .iter()
                .filter(|s| source_ids.contains(&s.id()))
                .count();
            if live != source_ids.len() {
                return Err(BurrowError::StorageEngine(format!(
                    "compaction sources of {} are no longer live in group {}",
                    target.file_name(),
                    self.name
                )));
            }
        }

        let existing = target.tombstones();
        let mut late = Vec::new();
        for source in sources {
            for tombstone in source
                .segment
                .tombstones()
                .into_iter()
                .skip(source.tombstone_watermark)
            {
                if tombstone.version < target.version() {
                    return Err(BurrowError::StorageEngine(format!(
                        "tombstone {} at version {} reached source {} after the merge into {} at version {} began",
                        tombstone.pattern,
                        tombstone.version,
                        source.segment.file_name(),
                        target.file_name(),
                        target.version()
                    )));
                }
                if !existing.contains(&tombstone) && !late.contains(&tombstone) {
                    late.push(tombstone);
                }
            }
        }
        for tombstone in &late {
            target.append_tombstone(tombstone)?;
        }
        let rehomed = late.len();

        {
            let mut set = self.segments.write();
            set.segments.retain(|s| !source_ids.contains(&s.id()));
            set.segments.push(target);
            set.segments.sort_by_key(|s| (s.version(), s.id()));
        }

        debug!(
            "Published compaction of {} segments in group {} ({} tombstones carried over)",
            sources.len(),
            self.name,
            rehomed
        );
        Ok(rehomed)
    }

    fn ttl_lower_bound(&self) -> Option<Timestamp> {
        let ttl = self.config.ttl?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos().min(Timestamp::MAX as u128) as Timestamp)
            .unwrap_or(0);
        let ttl = ttl.as_nanos().min(Timestamp::MAX as u128) as Timestamp;
        Some(now.saturating_sub(ttl))
    }
}

impl std::fmt::Debug for StorageGroupProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageGroupProcessor")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish()
    }
}

impl SnapshotSource for StorageGroupProcessor {
    fn acquire_snapshots(
        &self,
        paths: &BTreeSet<String>,
        time_filter: Option<&Filter>,
    ) -> Result<SnapshotSet> {
        self.acquire_snapshot_with_filter(paths, time_filter)
            .map(SnapshotSet::from)
    }
}

fn write_batch(path: &Path, meta: SegmentMeta, batch: &SegmentBatch, config: &GroupConfig) -> Result<()> {
    let mut writer = SegmentWriter::new(path, meta, config.sync_mode)?;
    for (series, points) in batch.series() {
        if !points.is_empty() {
            writer.write_series(series, points)?;
        }
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use tempfile::TempDir;

    fn open_group(dir: &Path) -> StorageGroupProcessor {
        StorageGroupProcessor::open(
            "root.sg",
            dir,
            GroupConfig::default().with_sync_mode(SyncMode::None),
        )
        .unwrap()
    }

    fn batch(points: &[(&str, Timestamp, f64)]) -> SegmentBatch {
        points.iter().map(|&(p, t, v)| (p, t, v)).collect()
    }

    #[test]
    fn test_flush_assigns_versions_and_classes() {
        let dir = TempDir::new().unwrap();
        let group = open_group(dir.path());

        let a = group.flush(batch(&[("root.sg.d1.s1", 10, 1.0)])).unwrap().unwrap();
        let b = group.flush(batch(&[("root.sg.d1.s1", 20, 2.0)])).unwrap().unwrap();
        let c = group.flush(batch(&[("root.sg.d1.s1", 15, 3.0)])).unwrap().unwrap();

        assert_eq!((a.version(), b.version(), c.version()), (1, 2, 3));
        assert!(a.is_sequence() && b.is_sequence());
        assert!(!c.is_sequence());
        assert_eq!(group.published_version(), 3);
        assert!(group.flush(SegmentBatch::new()).unwrap().is_none());
    }

    #[test]
    fn test_reopen_restores_state() {
        let dir = TempDir::new().unwrap();
        {
            let group = open_group(dir.path());
            group.flush(batch(&[("root.sg.d1.s1", 10, 1.0)])).unwrap();
            group
                .delete(&PathPattern::new("root.sg.d1.s1"), TimeRange::new(0, 10))
                .unwrap();
        }
        fs::write(dir.path().join("0000000000000009_V9_L0_S.seg.tmp"), b"partial").unwrap();

        let group = open_group(dir.path());
        assert_eq!(group.segments().len(), 1);
        assert_eq!(group.published_version(), 1);
        assert_eq!(group.segments()[0].tombstone_count(), 1);
        assert!(list_with_suffix(dir.path(), TEMP_SUFFIX).unwrap().is_empty());

        let next = group.flush(batch(&[("root.sg.d1.s1", 5, 1.0)])).unwrap().unwrap();
        assert_eq!(next.version(), 2);
        assert!(!next.is_sequence());
    }

    #[test]
    fn test_delete_only_touches_matching_segments() {
        let dir = TempDir::new().unwrap();
        let group = open_group(dir.path());
        group.flush(batch(&[("root.sg.d1.s1", 10, 1.0)])).unwrap();
        group.flush(batch(&[("root.sg.d2.s1", 20, 1.0)])).unwrap();
        group.flush(batch(&[("root.sg.d1.s1", 100, 1.0)])).unwrap();

        let attached = group
            .delete(&PathPattern::new("root.sg.d1.*"), TimeRange::new(0, 50))
            .unwrap();
        assert_eq!(attached, 1);
        assert_eq!(
            group.delete(&PathPattern::new("root.sg.**"), TimeRange::empty()).unwrap(),
            0
        );
    }

    #[test]
    fn test_snapshot_collects_tombstones_and_prunes() {
        let dir = TempDir::new().unwrap();
        let group = open_group(dir.path());
        group.flush(batch(&[("root.sg.d1.s1", 10, 1.0)])).unwrap();
        group.flush(batch(&[("root.sg.d1.s1", 100, 1.0)])).unwrap();
        group
            .delete(&PathPattern::new("root.sg.d1.s1"), TimeRange::all())
            .unwrap();

        let paths: BTreeSet<String> = ["root.sg.d1.s1".to_string()].into();
        let snapshot = group
            .acquire_snapshot_with_filter(&paths, Some(&Filter::time_between(50, 200)))
            .unwrap();
        assert_eq!(snapshot.segments().len(), 1);
        assert_eq!(snapshot.tombstones_for("root.sg.d1.s1").len(), 1);
        assert_eq!(snapshot.version(), 2);
    }

    #[test]
    fn test_snapshot_sees_whole_deletions() {
        let dir = TempDir::new().unwrap();
        let group = open_group(dir.path());
        group.flush(batch(&[("root.sg.d1.s1", 1, 1.0)])).unwrap();
        group.flush(batch(&[("root.sg.d2.s1", 1, 1.0)])).unwrap();
        let paths: BTreeSet<String> =
            ["root.sg.d1.s1".to_string(), "root.sg.d2.s1".to_string()].into();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for end in 1..200 {
                    group
                        .delete(&PathPattern::new("root.sg.*.s1"), TimeRange::new(0, end))
                        .unwrap();
                }
            });
            for _ in 0..200 {
                let snapshot = group.acquire_snapshot_with_filter(&paths, None).unwrap();
                assert_eq!(
                    snapshot.tombstones_for("root.sg.d1.s1"),
                    snapshot.tombstones_for("root.sg.d2.s1")
                );
            }
        });
        assert_eq!(group.segments()[1].tombstone_count(), 199);
    }

    #[test]
    fn test_compaction_token_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let group = open_group(dir.path());
        let token = group.try_compaction_token();
        assert!(token.is_some());
        assert!(group.try_compaction_token().is_none());
        drop(token);
        assert!(group.try_compaction_token().is_some());
    }
}
