//! Error and Result types for Burrow storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for Burrow operations.
pub type Result<T> = std::result::Result<T, BurrowError>;

/// The error type for segment, journal, compaction and query operations.
#[derive(Debug, Error)]
pub enum BurrowError {
    /// Underlying storage failed. Fatal to the current operation.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// A record that is not the last one in a journal is malformed.
    #[error("Corrupt journal {path:?} at offset {offset}: {reason}")]
    CorruptJournal {
        /// Journal file.
        path: PathBuf,
        /// Byte offset of the malformed record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A compaction log could not be interpreted.
    #[error("Corrupt compaction log {path:?}: {reason}")]
    CorruptCompactionLog {
        /// Log file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The predicate tree was rejected before any I/O happened.
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// No storage group with the given name is registered.
    #[error("Storage group not found: {0}")]
    GroupNotFound(String),

    /// A series path does not belong to any storage group.
    #[error("Series {0} does not resolve to a storage group")]
    SeriesUnresolved(String),

    /// Lock or snapshot acquisition failed for another reason.
    #[error("Storage engine error: {0}")]
    StorageEngine(String),

    /// Invalid magic bytes in a segment or journal header.
    #[error("Invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported on-disk format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Stored checksum does not match the computed one.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// Segment file structure is inconsistent.
    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),

    /// A file name inside a group directory does not follow the naming scheme.
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// A path or pattern is too long for its u16 length prefix.
    #[error("String of {0} bytes exceeds the encodable length of 65535 bytes")]
    StringTooLong(usize),
}

impl BurrowError {
    /// Returns true for errors the query layer reports as storage engine failures.
    pub fn is_storage_engine_error(&self) -> bool {
        matches!(
            self,
            Self::GroupNotFound(_) | Self::SeriesUnresolved(_) | Self::StorageEngine(_)
        )
    }

    pub(crate) fn corrupt_journal(
        path: impl Into<PathBuf>,
        offset: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self::CorruptJournal {
            path: path.into(),
            offset,
            reason: reason.into(),
        }
    }
}
