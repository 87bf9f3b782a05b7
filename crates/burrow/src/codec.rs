//! Length and CRC32 framed records shared by the tombstone journal and the compaction log.
//!
//! ```text
//! ┌──────────────┬──────────────┬───────────────────────┐
//! │ magic (4)    │ version (2)  │ records ...           │
//! └──────────────┴──────────────┴───────────────────────┘
//! record: length u32 LE | crc32(payload) u32 LE | payload
//! ```
//!
//! A scan distinguishes a torn tail (the last write was interrupted) from damage in the
//! middle of the file. Only the former is recoverable.

use crate::error::{BurrowError, Result};
use std::path::Path;

/// Size of the file header: magic plus format version.
pub const FILE_HEADER_SIZE: usize = 6;

/// Length and checksum fields preceding each payload.
pub const FRAME_OVERHEAD: usize = 8;

/// Largest payload accepted on replay.
pub const MAX_RECORD_SIZE: usize = 1 << 20;

/// Encodes the file header.
pub fn encode_header(magic: [u8; 4], version: u16) -> [u8; FILE_HEADER_SIZE] {
    let mut header = [0u8; FILE_HEADER_SIZE];
    header[..4].copy_from_slice(&magic);
    header[4..].copy_from_slice(&version.to_le_bytes());
    header
}

/// Frames one payload so it can be written with a single `write_all`.
pub fn encode_record(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Result of scanning a framed file.
#[derive(Debug, Default)]
pub struct ScannedRecords {
    /// Payloads of every complete record, in file order.
    pub records: Vec<Vec<u8>>,
    /// Length of the valid prefix, header included.
    pub valid_len: u64,
    /// True if bytes past `valid_len` were discarded as an interrupted write.
    pub torn_tail: bool,
}

/// Scans `bytes` read from `path`.
///
/// A missing or short header, a short frame, a payload running past the end of the data
/// or a checksum mismatch on the final record are treated as a torn tail. Any defect
/// followed by further bytes fails with [`BurrowError::CorruptJournal`].
pub fn scan(path: &Path, bytes: &[u8], magic: [u8; 4], version: u16) -> Result<ScannedRecords> {
    let total = bytes.len();
    if total == 0 {
        return Ok(ScannedRecords::default());
    }
    if total < FILE_HEADER_SIZE {
        return Ok(ScannedRecords {
            torn_tail: true,
            ..Default::default()
        });
    }
    if bytes[..4] != magic {
        return Err(BurrowError::corrupt_journal(path, 0, "bad magic"));
    }
    let found_version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if found_version != version {
        return Err(BurrowError::UnsupportedVersion(found_version));
    }

    let mut records = Vec::new();
    let mut pos = FILE_HEADER_SIZE;
    let mut torn_tail = false;

    while pos < total {
        if total - pos < FRAME_OVERHEAD {
            torn_tail = true;
            break;
        }
        let len = le_u32(&bytes[pos..pos + 4]) as usize;
        let expected_crc = le_u32(&bytes[pos + 4..pos + 8]);
        let start = pos + FRAME_OVERHEAD;
        let end = start.saturating_add(len);

        if end > total {
            torn_tail = true;
            break;
        }
        if len == 0 {
            if bytes[pos..].iter().all(|b| *b == 0) {
                torn_tail = true;
                break;
            }
            return Err(BurrowError::corrupt_journal(
                path,
                pos as u64,
                "zero length record",
            ));
        }
        if len > MAX_RECORD_SIZE {
            return Err(BurrowError::corrupt_journal(
                path,
                pos as u64,
                format!("record length {} exceeds limit", len),
            ));
        }

        let payload = &bytes[start..end];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            if end == total {
                torn_tail = true;
                break;
            }
            return Err(BurrowError::corrupt_journal(
                path,
                pos as u64,
                format!(
                    "checksum mismatch: expected {}, got {}",
                    expected_crc, actual_crc
                ),
            ));
        }

        records.push(payload.to_vec());
        pos = end;
    }

    Ok(ScannedRecords {
        records,
        valid_len: pos as u64,
        torn_tail,
    })
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

/// Cursor over a record payload. Every getter returns `None` once the payload is exhausted.
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Creates a reader positioned at the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.pos.checked_add(N)?;
        let slice = self.bytes.get(self.pos..end)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        self.pos = end;
        Some(buf)
    }

    /// Reads one byte.
    pub fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    /// Reads a little-endian u16.
    pub fn u16(&mut self) -> Option<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    /// Reads a little-endian u32.
    pub fn u32(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    /// Reads a little-endian u64.
    pub fn u64(&mut self) -> Option<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    /// Reads a little-endian i64.
    pub fn i64(&mut self) -> Option<i64> {
        self.take::<8>().map(i64::from_le_bytes)
    }

    /// Reads a little-endian f64.
    pub fn f64(&mut self) -> Option<f64> {
        self.take::<8>().map(f64::from_le_bytes)
    }

    /// Reads a u16 length prefixed UTF-8 string.
    pub fn string(&mut self) -> Option<String> {
        let len = self.u16()? as usize;
        let end = self.pos.checked_add(len)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        String::from_utf8(slice.to_vec()).ok()
    }

    /// Returns true if every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

/// Appends a u16 length prefixed string to `out`.
///
/// # Errors
///
/// Returns [`BurrowError::StringTooLong`] for strings over `u16::MAX` bytes; `out` is
/// left untouched.
pub fn put_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| BurrowError::StringTooLong(value.len()))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}
