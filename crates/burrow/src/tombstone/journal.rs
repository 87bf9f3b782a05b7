//! Append-only tombstone journal.
//!
//! Each segment owns one journal file beside it. Records use the framing in
//! [`crate::codec`]; an interrupted append leaves a torn tail that replay discards and
//! [`TombstoneJournal::open`] truncates.
//!
//! Appends are serialized by a mutex and only advance the committed length after the
//! bytes were written and synced, so [`TombstoneJournal::read_all`] always returns a
//! prefix of completed appends even while other threads keep appending. The file is
//! cut back to the committed length after every append, so bytes of a failed append
//! never survive behind a later record.

use crate::codec::{encode_header, encode_record, scan, FILE_HEADER_SIZE};
use crate::config::SyncMode;
use crate::error::{BurrowError, Result};
use crate::tombstone::Tombstone;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Journal file magic bytes.
const JOURNAL_MAGIC: [u8; 4] = *b"BTMB";

/// Journal format version.
const JOURNAL_VERSION: u16 = 1;

struct JournalState {
    file: Option<File>,
    committed_len: u64,
}

/// Tombstone journal of one segment.
pub struct TombstoneJournal {
    path: PathBuf,
    sync_mode: SyncMode,
    state: Mutex<JournalState>,
}

impl TombstoneJournal {
    /// Opens the journal at `path`. The file is created lazily on the first append.
    ///
    /// A torn tail left by a crash is truncated so that later appends extend the valid
    /// prefix.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::CorruptJournal`] if a record other than the last one is
    /// malformed.
    pub fn open(path: impl AsRef<Path>, sync_mode: SyncMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let committed_len = match fs::read(&path) {
            Ok(bytes) => {
                let scanned = scan(&path, &bytes, JOURNAL_MAGIC, JOURNAL_VERSION)?;
                if scanned.torn_tail {
                    warn!(
                        "Discarding {} trailing bytes of tombstone journal {:?}",
                        bytes.len() as u64 - scanned.valid_len,
                        path
                    );
                    let file = OpenOptions::new().write(true).open(&path)?;
                    file.set_len(scanned.valid_len)?;
                    sync_mode.sync(&file)?;
                }
                scanned.valid_len
            }
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            sync_mode,
            state: Mutex::new(JournalState {
                file: None,
                committed_len,
            }),
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one tombstone.
    ///
    /// The record is written with a single write and synced according to the sync
    /// mode before the call returns.
    ///
    /// # Errors
    ///
    /// Any I/O failure is returned; the deletion must then be treated as not recorded.
    /// Patterns too long to encode fail with [`BurrowError::StringTooLong`] before
    /// anything is written.
    pub fn append(&self, tombstone: &Tombstone) -> Result<()> {
        let frame = encode_record(&tombstone.encode()?);
        let mut state = self.state.lock();

        if let Err(e) = self.write_frame(&mut state, &frame) {
            // Drop whatever part of the frame reached the file; a fresh handle is
            // opened by the next append.
            if let Some(file) = state.file.take() {
                if let Err(trunc) = file.set_len(state.committed_len) {
                    warn!("Failed to cut back tombstone journal {:?}: {}", self.path, trunc);
                }
            }
            return Err(e);
        }

        debug!(
            "Appended tombstone {} [{}, {}] v{} to {:?}",
            tombstone.pattern,
            tombstone.range.start,
            tombstone.range.end,
            tombstone.version,
            self.path
        );
        Ok(())
    }

    fn write_frame(&self, state: &mut JournalState, frame: &[u8]) -> Result<()> {
        if state.file.is_none() {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;
            if state.committed_len == 0 {
                file.set_len(0)?;
                file.write_all(&encode_header(JOURNAL_MAGIC, JOURNAL_VERSION))?;
                state.committed_len = FILE_HEADER_SIZE as u64;
            }
            state.file = Some(file);
        }

        let offset = state.committed_len;
        let Some(file) = state.file.as_mut() else {
            return Err(BurrowError::StorageEngine(format!(
                "journal {:?} has no open handle",
                self.path
            )));
        };
        let end = offset + frame.len() as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(frame)?;
        file.set_len(end)?;
        self.sync_mode.sync(file)?;
        state.committed_len = end;
        Ok(())
    }

    /// Returns every completed record in append order.
    ///
    /// A missing file yields an empty list.
    pub fn read_all(&self) -> Result<Vec<Tombstone>> {
        let committed_len = self.state.lock().committed_len;
        if committed_len == 0 {
            return Ok(Vec::new());
        }

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::with_capacity(committed_len as usize);
        file.take(committed_len).read_to_end(&mut bytes)?;

        let scanned = scan(&self.path, &bytes, JOURNAL_MAGIC, JOURNAL_VERSION)?;
        scanned
            .records
            .iter()
            .enumerate()
            .map(|(i, payload)| {
                Tombstone::decode(payload).ok_or_else(|| {
                    BurrowError::corrupt_journal(
                        &self.path,
                        0,
                        format!("record {} is not a tombstone", i),
                    )
                })
            })
            .collect()
    }

    /// Deletes the journal file. Later appends start a fresh file.
    pub fn remove(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.file = None;
        state.committed_len = 0;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for TombstoneJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombstoneJournal")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::TimeRange;
    use tempfile::TempDir;

    fn create_test_journal() -> (TempDir, TombstoneJournal) {
        let temp_dir = TempDir::new().unwrap();
        let journal =
            TombstoneJournal::open(temp_dir.path().join("seg.mods"), SyncMode::None).unwrap();
        (temp_dir, journal)
    }

    fn tombstone(path: &str, end: i64, version: u64) -> Tombstone {
        Tombstone::new(path, TimeRange::new(0, end), version)
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let (_dir, journal) = create_test_journal();
        assert!(journal.read_all().unwrap().is_empty());
        assert!(!journal.path().exists());
    }

    #[test]
    fn test_write_read_interleaved() {
        let (_dir, journal) = create_test_journal();
        let records: Vec<_> = (0..4).map(|i| tombstone("root.sg.d1.s1", i, i as u64)).collect();

        journal.append(&records[0]).unwrap();
        journal.append(&records[1]).unwrap();
        assert_eq!(journal.read_all().unwrap(), records[..2].to_vec());

        journal.append(&records[2]).unwrap();
        journal.append(&records[3]).unwrap();
        assert_eq!(journal.read_all().unwrap(), records);
    }

    #[test]
    fn test_reopen_truncates_torn_tail_and_appends_after_prefix() {
        let (dir, journal) = create_test_journal();
        let a = tombstone("a.b", 1, 1);
        let b = tombstone("a.c", 2, 1);
        journal.append(&a).unwrap();
        journal.append(&b).unwrap();
        let path = journal.path().to_path_buf();
        drop(journal);

        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let journal = TombstoneJournal::open(dir.path().join("seg.mods"), SyncMode::None).unwrap();
        assert_eq!(journal.read_all().unwrap(), vec![a.clone()]);

        let c = tombstone("a.d", 3, 2);
        journal.append(&c).unwrap();
        drop(journal);
        let journal = TombstoneJournal::open(&path, SyncMode::None).unwrap();
        assert_eq!(journal.read_all().unwrap(), vec![a, c]);
    }

    #[test]
    fn test_append_overwrites_leftover_bytes() {
        let (dir, journal) = create_test_journal();
        let a = tombstone("root.sg.d1.s1", 1, 1);
        journal.append(&a).unwrap();

        // Bytes of an append that failed halfway, longer than the next frame.
        let mut leftover = OpenOptions::new().append(true).open(journal.path()).unwrap();
        leftover.write_all(&[0u8; 4]).unwrap();
        leftover.write_all(&[0xAB; 200]).unwrap();
        drop(leftover);

        let b = tombstone("a.b", 2, 2);
        journal.append(&b).unwrap();
        drop(journal);

        let journal = TombstoneJournal::open(dir.path().join("seg.mods"), SyncMode::None).unwrap();
        assert_eq!(journal.read_all().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_oversized_pattern_is_rejected() {
        let (_dir, journal) = create_test_journal();
        let a = tombstone("root.sg.d1.s1", 1, 1);
        journal.append(&a).unwrap();

        let long = format!("root.{}", "x".repeat(u16::MAX as usize));
        let err = journal.append(&tombstone(&long, 1, 1)).unwrap_err();
        assert!(matches!(err, BurrowError::StringTooLong(_)));
        assert_eq!(journal.read_all().unwrap(), vec![a]);
    }

    #[test]
    fn test_remove_then_append_starts_fresh() {
        let (_dir, journal) = create_test_journal();
        journal.append(&tombstone("a.b", 1, 1)).unwrap();
        journal.remove().unwrap();
        assert!(!journal.path().exists());
        assert!(journal.read_all().unwrap().is_empty());

        let t = tombstone("a.c", 5, 2);
        journal.append(&t).unwrap();
        assert_eq!(journal.read_all().unwrap(), vec![t]);
    }
}
