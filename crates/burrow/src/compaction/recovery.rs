//! Restart handling of compaction logs.
//!
//! Runs before a group loads its segments:
//!
//! - log without the completion marker: the merge never finished. The partial target
//!   and the log are removed and the sources stay live.
//! - complete log, target present: the target is authoritative. Tombstones the merge
//!   did not apply are carried from surviving sources into the target journal, then
//!   the sources and the log are removed.
//! - complete log, target missing: the marker is only written once the target is
//!   durable, so the target was itself compacted into a later segment that holds its
//!   data and tombstones. Surviving sources are stale and are removed with the log.

use crate::compaction::log::{remove_log, CompactionLog, CompactionLogState};
use crate::config::SyncMode;
use crate::error::Result;
use crate::segment::naming::{journal_path, list_with_suffix, temp_path, COMPACTION_LOG_SUFFIX};
use crate::segment::resource::remove_segment_files;
use crate::tombstone::TombstoneJournal;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::info;

/// What recovery did in one group directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Unfinished compactions rolled back.
    pub abandoned: usize,
    /// Finished compactions whose target was kept.
    pub republished: usize,
    /// Finished compactions whose target was already compacted again.
    pub superseded: usize,
    /// Source segments removed.
    pub removed_sources: usize,
    /// Tombstones carried into targets.
    pub rehomed_tombstones: usize,
}

impl RecoveryReport {
    /// Returns true if no log was found.
    pub fn is_empty(&self) -> bool {
        self.abandoned + self.republished + self.superseded == 0
    }
}

/// Resolves every compaction log found in `dir`.
pub fn recover_group_dir(dir: &Path, sync_mode: SyncMode) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    for log_path in list_with_suffix(dir, COMPACTION_LOG_SUFFIX)? {
        let state = CompactionLog::read(&log_path)?;
        if !state.complete {
            abandon(&state)?;
            report.abandoned += 1;
            info!("Abandoned unfinished compaction into {:?}", state.target);
        } else if state.target.exists() {
            republish(dir, &state, sync_mode, &mut report)?;
            report.republished += 1;
            info!("Completed interrupted compaction into {:?}", state.target);
        } else {
            remove_sources(dir, &state, &mut report)?;
            report.superseded += 1;
            info!(
                "Compaction target {:?} was compacted again; removed its stale sources",
                state.target
            );
        }
        remove_log(&log_path)?;
    }
    Ok(report)
}

fn abandon(state: &CompactionLogState) -> Result<()> {
    match fs::remove_file(temp_path(&state.target)) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    remove_segment_files(&state.target)?;
    Ok(())
}

fn republish(
    dir: &Path,
    state: &CompactionLogState,
    sync_mode: SyncMode,
    report: &mut RecoveryReport,
) -> Result<()> {
    let target_journal = TombstoneJournal::open(journal_path(&state.target), sync_mode)?;
    let mut existing = target_journal.read_all()?;

    for source in &state.sources {
        let source_path = dir.join(&source.file_name);
        if !source_path.exists() {
            continue;
        }
        let journal = TombstoneJournal::open(journal_path(&source_path), sync_mode)?;
        let skip = usize::try_from(source.tombstone_watermark).unwrap_or(usize::MAX);
        for tombstone in journal.read_all()?.into_iter().skip(skip) {
            if existing.contains(&tombstone) {
                continue;
            }
            target_journal.append(&tombstone)?;
            existing.push(tombstone);
            report.rehomed_tombstones += 1;
        }
    }

    remove_sources(dir, state, report)
}

fn remove_sources(dir: &Path, state: &CompactionLogState, report: &mut RecoveryReport) -> Result<()> {
    for source in &state.sources {
        let source_path = dir.join(&source.file_name);
        if source_path.exists() {
            report.removed_sources += 1;
        }
        remove_segment_files(&source_path)?;
    }
    Ok(())
}
