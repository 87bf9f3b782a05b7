//! Compaction: merging segments, retiring tombstones, and recovering interrupted runs.

pub mod engine;
pub mod log;
pub mod merge;
pub mod recovery;
pub mod scheduler;
pub mod selector;

pub use engine::{sweep_finished_logs, CompactionEngine, CompactionOutcome, CompactionSummary};
pub use log::{CompactionLog, CompactionLogEntry, CompactionLogState, SourceInfo};
pub use merge::{merge_segments, MergeSource, MergeStats};
pub use recovery::{recover_group_dir, RecoveryReport};
pub use scheduler::CompactionScheduler;
pub use selector::{CandidateSelector, SequenceClassSelector};
