//! Choice of compaction candidates.

use crate::config::CompactionConfig;
use crate::segment::{SegmentResource, SegmentStatus, TimeRange};
use std::sync::Arc;

/// Picks the segments one compaction should merge.
///
/// Every returned segment must be live and of the same sequence class; an empty result
/// means there is nothing worth compacting.
pub trait CandidateSelector: Send + Sync {
    /// Selects candidates among the `live` segments of a group.
    fn select(
        &self,
        live: &[Arc<SegmentResource>],
        config: &CompactionConfig,
    ) -> Vec<Arc<SegmentResource>>;
}

/// Merges the oldest closed segments of one sequence class, sequence segments first.
///
/// Candidates are taken in version order. A skipped segment whose time range overlaps
/// the candidates taken so far ends the run: the target inherits the highest source
/// version, so merging across it would let older points shadow newer ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceClassSelector;

impl CandidateSelector for SequenceClassSelector {
    fn select(
        &self,
        live: &[Arc<SegmentResource>],
        config: &CompactionConfig,
    ) -> Vec<Arc<SegmentResource>> {
        let mut ordered: Vec<&Arc<SegmentResource>> = live.iter().collect();
        ordered.sort_by_key(|s| (s.version(), s.id()));

        let classes = [
            (true, config.enable_sequence),
            (false, config.enable_unsequence),
        ];
        for (sequence, enabled) in classes {
            if !enabled {
                continue;
            }
            let mut picked: Vec<Arc<SegmentResource>> = Vec::new();
            let mut covered = TimeRange::empty();
            for segment in &ordered {
                if picked.len() >= config.max_segments {
                    break;
                }
                if segment.status() == SegmentStatus::Closed && segment.is_sequence() == sequence {
                    covered = covered.union(&segment.time_range());
                    picked.push(Arc::clone(segment));
                } else if segment.time_range().overlaps(&covered) {
                    break;
                }
            }
            if picked.len() >= config.min_segments {
                return picked;
            }
        }
        Vec::new()
    }
}
