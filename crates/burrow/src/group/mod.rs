//! Storage groups: the unit that owns segments, accepts deletions, and hands out
//! query snapshots.

pub mod batch;
pub mod processor;
pub mod snapshot;

pub use batch::SegmentBatch;
pub use processor::{CompactionSource, StorageGroupProcessor};
pub use snapshot::{QuerySnapshot, SeriesView, SnapshotSet, SnapshotSource};
