//! Compaction engine.
//!
//! One run of [`CompactionEngine::run_once`] merges the candidates of one group:
//!
//! 1. claim the group's compaction token, then the candidate segments together with
//!    their tombstone watermarks under the group's deletion gate
//! 2. record each source's watermark in a fresh compaction log
//! 3. merge into `<target>.tmp`, validate, rename, mark the log complete
//! 4. publish through the group's merge lock, carrying late tombstones over
//! 5. mark the sources deleted; their files go once the last query releases them
//!
//! Anything failing before the publish rolls back: the sources return to Closed and
//! the partial target and the log are removed.

use crate::compaction::log::{remove_log, CompactionLog, SourceInfo};
use crate::compaction::merge::{merge_segments, MergeSource, MergeStats};
use crate::compaction::selector::{CandidateSelector, SequenceClassSelector};
use crate::config::CompactionConfig;
use crate::error::Result;
use crate::group::{CompactionSource, StorageGroupProcessor};
use crate::segment::file::{promote_temp, SegmentMeta};
use crate::segment::naming::{compaction_log_path, list_with_suffix, temp_path, COMPACTION_LOG_SUFFIX};
use crate::segment::resource::remove_segment_files;
use crate::segment::{SegmentId, SegmentName, SegmentResource};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one compaction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// A target was published.
    Compacted(CompactionSummary),
    /// The selector found nothing to merge.
    NoCandidates,
    /// Another compaction of the group is running.
    Busy,
    /// The attempt failed and was rolled back.
    Skipped {
        /// Why the attempt was abandoned.
        reason: String,
    },
}

impl CompactionOutcome {
    /// Returns true if a target was published.
    pub fn is_compacted(&self) -> bool {
        matches!(self, CompactionOutcome::Compacted(_))
    }
}

/// Details of a published compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionSummary {
    /// Group name.
    pub group: String,
    /// Target segment id.
    pub target: SegmentId,
    /// Source segment ids.
    pub sources: Vec<SegmentId>,
    /// Merge counters.
    pub stats: MergeStats,
    /// Tombstones applied by the merge and no longer needed.
    pub tombstones_retired: usize,
    /// Tombstones carried over to the target.
    pub tombstones_rehomed: usize,
    /// Sources still held by queries when the compaction finished.
    pub deferred_deletions: usize,
}

struct Published {
    summary: CompactionSummary,
    log: CompactionLog,
    source_paths: Vec<PathBuf>,
}

/// Runs compactions with a pluggable candidate selector.
pub struct CompactionEngine {
    config: CompactionConfig,
    selector: Box<dyn CandidateSelector>,
}

impl CompactionEngine {
    /// Creates an engine using [`SequenceClassSelector`].
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            selector: Box::new(SequenceClassSelector),
        }
    }

    /// Replaces the candidate selector.
    pub fn with_selector(mut self, selector: impl CandidateSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Runs at most one compaction in `group`.
    ///
    /// Failures never surface as errors: the attempt is rolled back, logged, and
    /// reported as [`CompactionOutcome::Skipped`].
    pub fn run_once(&self, group: &StorageGroupProcessor) -> CompactionOutcome {
        let Some(_token) = group.try_compaction_token() else {
            debug!("Compaction of group {} already running", group.name());
            return CompactionOutcome::Busy;
        };

        match sweep_finished_logs(group.dir()) {
            Ok(0) => {}
            Ok(n) => debug!("Discarded {} finished compaction logs in group {}", n, group.name()),
            Err(e) => warn!("Failed to sweep compaction logs of group {}: {}", group.name(), e),
        }

        let candidates = {
            let live = group.segments();
            self.selector.select(&live, &self.config)
        };
        if candidates.is_empty() {
            return CompactionOutcome::NoCandidates;
        }
        if let Some(reason) = reject(&candidates) {
            warn!("Selector returned unusable candidates in group {}: {}", group.name(), reason);
            return CompactionOutcome::Skipped { reason };
        }

        let Some(sources) = group.claim_compaction_sources(&candidates) else {
            return CompactionOutcome::NoCandidates;
        };
        drop(candidates);

        let published = match self.compact(group, &sources) {
            Ok(published) => published,
            Err(e) => {
                for source in &sources {
                    source.segment.end_compaction();
                }
                warn!("Compaction of group {} skipped: {}", group.name(), e);
                return CompactionOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        for source in &sources {
            source.segment.mark_deleted();
        }
        drop(sources);
        CompactionOutcome::Compacted(finish(published))
    }

    fn compact(
        &self,
        group: &StorageGroupProcessor,
        sources: &[CompactionSource],
    ) -> Result<Published> {
        let sync_mode = group.config().sync_mode;
        let candidates: Vec<&Arc<SegmentResource>> = sources.iter().map(|s| &s.segment).collect();
        let merge_sources: Vec<MergeSource> = sources
            .iter()
            .map(|source| MergeSource {
                segment: Arc::clone(&source.segment),
                tombstones: source
                    .segment
                    .tombstones()
                    .into_iter()
                    .take(source.tombstone_watermark)
                    .collect(),
            })
            .collect();

        let meta = SegmentMeta {
            version: candidates.iter().map(|c| c.version()).max().unwrap_or_default(),
            level: candidates
                .iter()
                .map(|c| c.level())
                .max()
                .unwrap_or_default()
                .saturating_add(1),
            sequence: candidates.iter().all(|c| c.is_sequence()),
        };
        let target_id = group.allocate_segment_id();
        let target_path = SegmentName::new(target_id, meta).path_in(group.dir());
        let infos: Vec<SourceInfo> = sources
            .iter()
            .map(|source| SourceInfo {
                segment_id: source.segment.id(),
                file_name: source.segment.file_name(),
                tombstone_watermark: source.tombstone_watermark as u64,
            })
            .collect();

        let mut log = CompactionLog::begin(
            compaction_log_path(&target_path),
            &infos,
            meta.sequence,
            sync_mode,
        )?;
        debug!(
            "Compacting {} segments of group {} into {}",
            candidates.len(),
            group.name(),
            target_path.display()
        );

        let written = merge_segments(&merge_sources, &temp_path(&target_path), meta, sync_mode)
            .and_then(|stats| {
                promote_temp(&temp_path(&target_path), &target_path, sync_mode)?;
                log.complete()?;
                let target = SegmentResource::open(&target_path, sync_mode)?;
                Ok((stats, Arc::new(target)))
            });
        let (stats, target) = match written {
            Ok(written) => written,
            Err(e) => {
                roll_back(&target_path, log);
                return Err(e);
            }
        };
        drop(merge_sources);

        let rehomed = match group.publish_compaction_result(sources, Arc::clone(&target)) {
            Ok(rehomed) => rehomed,
            Err(e) => {
                drop(target);
                roll_back(&target_path, log);
                return Err(e);
            }
        };

        Ok(Published {
            summary: CompactionSummary {
                group: group.name().to_string(),
                target: target_id,
                sources: candidates.iter().map(|c| c.id()).collect(),
                stats,
                tombstones_retired: sources.iter().map(|s| s.tombstone_watermark).sum(),
                tombstones_rehomed: rehomed,
                deferred_deletions: 0,
            },
            log,
            source_paths: candidates.iter().map(|c| c.path().to_path_buf()).collect(),
        })
    }
}

impl std::fmt::Debug for CompactionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionEngine")
            .field("config", &self.config)
            .finish()
    }
}

fn reject(candidates: &[Arc<SegmentResource>]) -> Option<String> {
    let sequence = candidates.first()?.is_sequence();
    if candidates.iter().any(|c| c.is_sequence() != sequence) {
        return Some("candidates mix sequence classes".to_string());
    }
    let mut ids: Vec<SegmentId> = candidates.iter().map(|c| c.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != candidates.len() {
        return Some("candidates contain duplicates".to_string());
    }
    None
}

fn roll_back(target_path: &Path, log: CompactionLog) {
    let temp = temp_path(target_path);
    if let Err(e) = fs::remove_file(&temp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial target {:?}: {}", temp, e);
        }
    }
    if let Err(e) = remove_segment_files(target_path) {
        warn!("Failed to remove abandoned target {:?}: {}", target_path, e);
    }
    if let Err(e) = log.discard() {
        warn!("Failed to remove compaction log of {:?}: {}", target_path, e);
    }
}

fn finish(published: Published) -> CompactionSummary {
    let Published {
        mut summary,
        log,
        source_paths,
    } = published;

    summary.deferred_deletions = source_paths.iter().filter(|p| p.exists()).count();
    if summary.deferred_deletions == 0 {
        if let Err(e) = log.discard() {
            warn!("Failed to discard finished compaction log: {}", e);
        }
    } else {
        debug!(
            "{} compaction sources of group {} still in use; keeping the log",
            summary.deferred_deletions, summary.group
        );
    }

    info!(
        "Compacted {} segments of group {} into segment {}: {} points, {} deleted, {} tombstones retired, {} carried over",
        summary.sources.len(),
        summary.group,
        summary.target,
        summary.stats.points_written,
        summary.stats.points_deleted,
        summary.tombstones_retired,
        summary.tombstones_rehomed
    );
    summary
}

/// Removes complete compaction logs whose sources are all gone.
///
/// Logs are kept while a query still holds a source, so a crash in that window is
/// finished by recovery; a later run discards them here.
pub fn sweep_finished_logs(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for log_path in list_with_suffix(dir, COMPACTION_LOG_SUFFIX)? {
        let state = CompactionLog::read(&log_path)?;
        if !state.complete {
            continue;
        }
        if state.sources.iter().all(|s| !dir.join(&s.file_name).exists()) {
            remove_log(&log_path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
