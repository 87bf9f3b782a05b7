//! File naming inside a storage group directory.
//!
//! ```text
//! 000000000000002a_V17_L1_S.seg                  segment 42, version 17, level 1, sequence
//! 000000000000002a_V17_L1_S.seg.mods             its tombstone journal
//! 000000000000002a_V17_L1_S.seg.tmp              segment being written
//! 000000000000002a_V17_L1_S.seg.compaction.log   compaction that produces segment 42
//! ```

use crate::error::Result;
use crate::segment::file::SegmentMeta;
use crate::segment::{SegmentId, Version};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Segment file extension.
pub const SEGMENT_EXTENSION: &str = "seg";

/// Suffix appended to a segment file name for its tombstone journal.
pub const JOURNAL_SUFFIX: &str = ".mods";

/// Suffix appended to a segment file name while it is being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Suffix appended to a target segment file name for its compaction log.
pub const COMPACTION_LOG_SUFFIX: &str = ".compaction.log";

/// Identity encoded in a segment file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentName {
    /// Segment id.
    pub id: SegmentId,
    /// Seal version.
    pub version: Version,
    /// Compaction level.
    pub level: u16,
    /// Sequence classification.
    pub sequence: bool,
}

impl SegmentName {
    /// Builds the name for a segment.
    pub fn new(id: SegmentId, meta: SegmentMeta) -> Self {
        Self {
            id,
            version: meta.version,
            level: meta.level,
            sequence: meta.sequence,
        }
    }

    /// Identity fields as stored in the segment header.
    pub fn meta(&self) -> SegmentMeta {
        SegmentMeta {
            version: self.version,
            level: self.level,
            sequence: self.sequence,
        }
    }

    /// Formats `{id_hex}_V{version}_L{level}_{S|U}.seg`.
    pub fn file_name(&self) -> String {
        format!(
            "{:016x}_V{}_L{}_{}.{}",
            self.id,
            self.version,
            self.level,
            if self.sequence { 'S' } else { 'U' },
            SEGMENT_EXTENSION
        )
    }

    /// Parses a file name produced by [`SegmentName::file_name`].
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".seg")?;
        let mut parts = stem.split('_');
        let id_hex = parts.next()?;
        let version_part = parts.next()?;
        let level_part = parts.next()?;
        let class_part = parts.next()?;
        if parts.next().is_some() || id_hex.len() != 16 {
            return None;
        }

        let id = u64::from_str_radix(id_hex, 16).ok()?;
        let version = version_part.strip_prefix('V')?.parse::<u64>().ok()?;
        let level = level_part.strip_prefix('L')?.parse::<u16>().ok()?;
        let sequence = match class_part {
            "S" => true,
            "U" => false,
            _ => return None,
        };
        Some(Self {
            id,
            version,
            level,
            sequence,
        })
    }

    /// Path of this segment inside `dir`.
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Tombstone journal belonging to the segment at `segment_path`.
pub fn journal_path(segment_path: &Path) -> PathBuf {
    with_suffix(segment_path, JOURNAL_SUFFIX)
}

/// Temporary file a segment is written to before the rename.
pub fn temp_path(segment_path: &Path) -> PathBuf {
    with_suffix(segment_path, TEMP_SUFFIX)
}

/// Compaction log of the compaction producing `target_path`.
pub fn compaction_log_path(target_path: &Path) -> PathBuf {
    with_suffix(target_path, COMPACTION_LOG_SUFFIX)
}

/// Target segment path recorded by the name of a compaction log.
pub fn target_of_log(log_path: &Path) -> Option<PathBuf> {
    let name = log_path.file_name()?.to_str()?;
    let target = name.strip_suffix(COMPACTION_LOG_SUFFIX)?;
    SegmentName::parse(target)?;
    Some(log_path.with_file_name(target))
}

/// Lists files in `dir` whose name ends with `suffix`. A missing directory is empty.
pub fn list_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Lists sealed segment files in `dir`, ordered by id.
pub fn list_segment_files(dir: &Path) -> Result<Vec<(SegmentName, PathBuf)>> {
    let mut segments: Vec<_> = list_with_suffix(dir, ".seg")?
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            Some((SegmentName::parse(name)?, path.clone()))
        })
        .collect();
    segments.sort_by_key(|(name, _)| name.id);
    Ok(segments)
}
