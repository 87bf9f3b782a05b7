//! In-memory handle of one sealed segment.
//!
//! Processors and query snapshots share segments through `Arc<SegmentResource>`. Marking
//! a segment [`SegmentStatus::Deleted`] only removes it logically; its data file and
//! journal are unlinked when the last handle is dropped, so a snapshot taken before a
//! compaction keeps reading the sources it captured.

use crate::config::SyncMode;
use crate::error::{BurrowError, Result};
use crate::segment::file::{read_block, SegmentMeta, SegmentReader, SeriesIndex};
use crate::segment::naming::{journal_path, SegmentName};
use crate::segment::{SegmentId, SegmentStatus, TimeRange, Timestamp, Version};
use crate::tombstone::{PathPattern, Tombstone, TombstoneJournal};
use parking_lot::RwLock;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, warn};

/// A sealed segment plus the tombstones attached to it.
#[derive(Debug)]
pub struct SegmentResource {
    id: SegmentId,
    path: PathBuf,
    meta: SegmentMeta,
    time_range: TimeRange,
    index: SeriesIndex,
    status: AtomicU8,
    journal: TombstoneJournal,
    tombstones: RwLock<Vec<Tombstone>>,
}

impl SegmentResource {
    /// Opens a sealed segment file and replays its tombstone journal.
    ///
    /// The file name must follow [`SegmentName`]; its identity has to agree with the
    /// header.
    pub fn open(path: &Path, sync_mode: SyncMode) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(SegmentName::parse)
            .ok_or_else(|| BurrowError::InvalidFileName(path.display().to_string()))?;

        let reader = SegmentReader::open(path)?;
        let (header, index) = reader.into_parts();
        if header.meta != name.meta() {
            return Err(BurrowError::CorruptSegment(format!(
                "{:?} header {:?} disagrees with its name",
                path, header.meta
            )));
        }

        let journal = TombstoneJournal::open(journal_path(path), sync_mode)?;
        let tombstones = journal.read_all()?;
        debug!(
            "Opened segment {} with {} series and {} tombstones",
            name.file_name(),
            index.len(),
            tombstones.len()
        );

        Ok(Self {
            id: name.id,
            path: path.to_path_buf(),
            meta: header.meta,
            time_range: header.time_range(),
            index,
            status: AtomicU8::new(SegmentStatus::Closed as u8),
            journal,
            tombstones: RwLock::new(tombstones),
        })
    }

    /// Segment id.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Data file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name.
    pub fn file_name(&self) -> String {
        SegmentName::new(self.id, self.meta).file_name()
    }

    /// Seal version.
    pub fn version(&self) -> Version {
        self.meta.version
    }

    /// Compaction level.
    pub fn level(&self) -> u16 {
        self.meta.level
    }

    /// True for sequence segments.
    pub fn is_sequence(&self) -> bool {
        self.meta.sequence
    }

    /// Identity fields.
    pub fn meta(&self) -> SegmentMeta {
        self.meta
    }

    /// Time range of all points in the segment.
    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    /// Series index.
    pub fn index(&self) -> &SeriesIndex {
        &self.index
    }

    /// Returns true if the segment holds `path`.
    pub fn contains_series(&self, path: &str) -> bool {
        self.index.get(path).is_some()
    }

    /// Returns true if some series in the segment is selected by `pattern`.
    pub fn contains_match(&self, pattern: &PathPattern) -> bool {
        if pattern.is_concrete() {
            return self.contains_series(pattern.as_str());
        }
        self.index.iter().any(|entry| pattern.matches(&entry.path))
    }

    /// Time range of one series, if present.
    pub fn series_range(&self, path: &str) -> Option<TimeRange> {
        self.index.get(path).map(|entry| entry.time_range())
    }

    /// Reads one series in timestamp order.
    pub fn read_series(&self, path: &str) -> Result<Option<Vec<(Timestamp, f64)>>> {
        match self.index.get(path) {
            Some(entry) => read_block(&self.path, entry).map(Some),
            None => Ok(None),
        }
    }

    /// Current status.
    pub fn status(&self) -> SegmentStatus {
        SegmentStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(SegmentStatus::Deleted)
    }

    /// Claims the segment as a compaction source. Fails unless it is Closed.
    pub fn try_begin_compaction(&self) -> bool {
        self.status
            .compare_exchange(
                SegmentStatus::Closed as u8,
                SegmentStatus::Compacting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns a claimed segment to Closed after an abandoned compaction.
    pub fn end_compaction(&self) {
        let _ = self.status.compare_exchange(
            SegmentStatus::Compacting as u8,
            SegmentStatus::Closed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Marks the segment Deleted; files are removed when the last handle drops.
    pub fn mark_deleted(&self) {
        self.status
            .store(SegmentStatus::Deleted as u8, Ordering::Release);
    }

    /// Records a tombstone: journal first, then the in-memory copy.
    ///
    /// # Errors
    ///
    /// A journal failure is returned and the tombstone is not attached.
    pub fn append_tombstone(&self, tombstone: &Tombstone) -> Result<()> {
        self.journal_tombstone(tombstone)?;
        self.attach_tombstone(tombstone.clone());
        Ok(())
    }

    /// Writes a tombstone to the journal only. Queries see it after
    /// [`SegmentResource::attach_tombstone`].
    pub(crate) fn journal_tombstone(&self, tombstone: &Tombstone) -> Result<()> {
        self.journal.append(tombstone)
    }

    /// Adds an already journaled tombstone to the in-memory copy.
    pub(crate) fn attach_tombstone(&self, tombstone: Tombstone) {
        self.tombstones.write().push(tombstone);
    }

    /// Every attached tombstone in append order.
    pub fn tombstones(&self) -> Vec<Tombstone> {
        self.tombstones.read().clone()
    }

    /// Number of attached tombstones.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.read().len()
    }

    /// Attached tombstones selecting `path`.
    pub fn tombstones_for(&self, path: &str) -> Vec<Tombstone> {
        self.tombstones
            .read()
            .iter()
            .filter(|t| t.pattern.matches(path))
            .cloned()
            .collect()
    }

    /// The tombstone journal.
    pub fn journal(&self) -> &TombstoneJournal {
        &self.journal
    }
}

/// Removes a segment file and its journal, ignoring files that are already gone.
pub fn remove_segment_files(path: &Path) -> std::io::Result<()> {
    for file in [path.to_path_buf(), journal_path(path)] {
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Drop for SegmentResource {
    fn drop(&mut self) {
        if self.status() != SegmentStatus::Deleted {
            return;
        }
        match remove_segment_files(&self.path) {
            Ok(()) => debug!("Removed deleted segment {:?}", self.path),
            Err(e) => warn!("Failed to remove deleted segment {:?}: {}", self.path, e),
        }
    }
}
