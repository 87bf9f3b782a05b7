//! Crash-recoverable record of one in-flight compaction.
//!
//! The log lives beside its target as `<target>.compaction.log`. Entries are written
//! before anything destructive happens:
//!
//! ```text
//! SourceInfo*  SequenceFlag  [MergeComplete]
//! ```
//!
//! A log without `MergeComplete` after a restart marks a merge that must be abandoned;
//! with the marker, the target is authoritative and only the publish step may be missing.

use crate::codec::{encode_header, encode_record, put_string, scan, PayloadReader};
use crate::config::SyncMode;
use crate::error::{BurrowError, Result};
use crate::segment::naming::target_of_log;
use crate::segment::SegmentId;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOG_MAGIC: [u8; 4] = *b"BCLG";
const LOG_VERSION: u16 = 1;

const TAG_SOURCE_INFO: u8 = 1;
const TAG_SEQUENCE_FLAG: u8 = 2;
const TAG_MERGE_COMPLETE: u8 = 3;

/// One compaction source as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Source segment id.
    pub segment_id: SegmentId,
    /// Source file name inside the group directory.
    pub file_name: String,
    /// Number of the source's tombstones applied by the merge. Later ones are re-homed.
    pub tombstone_watermark: u64,
}

/// A compaction log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionLogEntry {
    /// A source segment.
    SourceInfo(SourceInfo),
    /// Sequence classification of sources and target.
    SequenceFlag(bool),
    /// The target is fully written and validated.
    MergeComplete,
}

impl CompactionLogEntry {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::SourceInfo(info) => {
                out.push(TAG_SOURCE_INFO);
                out.extend_from_slice(&info.segment_id.to_le_bytes());
                out.extend_from_slice(&info.tombstone_watermark.to_le_bytes());
                put_string(&mut out, &info.file_name)?;
            }
            Self::SequenceFlag(sequence) => {
                out.push(TAG_SEQUENCE_FLAG);
                out.push(u8::from(*sequence));
            }
            Self::MergeComplete => out.push(TAG_MERGE_COMPLETE),
        }
        Ok(out)
    }

    fn decode(payload: &[u8]) -> Option<Self> {
        let mut reader = PayloadReader::new(payload);
        let entry = match reader.u8()? {
            TAG_SOURCE_INFO => {
                let segment_id = reader.u64()?;
                let tombstone_watermark = reader.u64()?;
                let file_name = reader.string()?;
                Self::SourceInfo(SourceInfo {
                    segment_id,
                    file_name,
                    tombstone_watermark,
                })
            }
            TAG_SEQUENCE_FLAG => Self::SequenceFlag(reader.u8()? != 0),
            TAG_MERGE_COMPLETE => Self::MergeComplete,
            _ => return None,
        };
        reader.is_empty().then_some(entry)
    }
}

/// What a compaction log says after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionLogState {
    /// Target segment path.
    pub target: PathBuf,
    /// Recorded sources.
    pub sources: Vec<SourceInfo>,
    /// Recorded sequence flag, if it made it to disk.
    pub sequence: Option<bool>,
    /// True if `MergeComplete` is present.
    pub complete: bool,
}

/// Handle on the log of a running compaction.
#[derive(Debug)]
pub struct CompactionLog {
    path: PathBuf,
    file: File,
    sync_mode: SyncMode,
}

impl CompactionLog {
    /// Creates the log and records the sources and sequence flag.
    ///
    /// Fails if a log already exists at `path`.
    pub fn begin(
        path: impl AsRef<Path>,
        sources: &[SourceInfo],
        is_sequence: bool,
        sync_mode: SyncMode,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut buf = encode_header(LOG_MAGIC, LOG_VERSION).to_vec();
        for source in sources {
            buf.extend(encode_record(
                &CompactionLogEntry::SourceInfo(source.clone()).encode()?,
            ));
        }
        buf.extend(encode_record(
            &CompactionLogEntry::SequenceFlag(is_sequence).encode()?,
        ));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&buf)?;
        sync_mode.sync(&file)?;
        if let Some(dir) = path.parent() {
            sync_mode.sync_dir(dir);
        }

        debug!("Began compaction log {:?} with {} sources", path, sources.len());
        Ok(Self {
            path,
            file,
            sync_mode,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the completion marker. Call only once the target is durable.
    pub fn complete(&mut self) -> Result<()> {
        let marker = encode_record(&CompactionLogEntry::MergeComplete.encode()?);
        self.file.write_all(&marker)?;
        self.sync_mode.sync(&self.file)?;
        Ok(())
    }

    /// Removes the log.
    pub fn discard(self) -> Result<()> {
        let path = self.path;
        drop(self.file);
        remove_log(&path)
    }

    /// Reads a log left on disk.
    pub fn read(path: &Path) -> Result<CompactionLogState> {
        let corrupt = |reason: String| BurrowError::CorruptCompactionLog {
            path: path.to_path_buf(),
            reason,
        };
        let target = target_of_log(path).ok_or_else(|| corrupt("unrecognised name".into()))?;
        let bytes = fs::read(path)?;
        let scanned = scan(path, &bytes, LOG_MAGIC, LOG_VERSION).map_err(|e| match e {
            BurrowError::CorruptJournal { reason, .. } => corrupt(reason),
            other => other,
        })?;

        let mut state = CompactionLogState {
            target,
            sources: Vec::new(),
            sequence: None,
            complete: false,
        };
        for payload in &scanned.records {
            match CompactionLogEntry::decode(payload) {
                Some(CompactionLogEntry::SourceInfo(info)) => state.sources.push(info),
                Some(CompactionLogEntry::SequenceFlag(flag)) => state.sequence = Some(flag),
                Some(CompactionLogEntry::MergeComplete) => state.complete = true,
                None => return Err(corrupt("unknown entry".into())),
            }
        }
        Ok(state)
    }
}

/// Removes a log file, ignoring one that is already gone.
pub fn remove_log(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
