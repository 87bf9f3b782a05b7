//! Burrow - segment storage core of the Alopex time series store
//!
//! This crate keeps immutable segment files per storage group, records deletions as
//! versioned tombstones, merges segments in crash-recoverable compactions, and
//! evaluates filter expressions as ordered timestamp streams.
//!
//! # Components
//!
//! - [`StorageEngine`]: the storage groups of one data directory
//! - [`StorageGroupProcessor`]: flushes, deletions, snapshots and compaction publishing
//! - [`SegmentResource`]: a sealed segment with its tombstone journal
//! - [`CompactionEngine`] / [`CompactionScheduler`]: merging and background scheduling
//! - [`TimeGenerator`]: AND/OR evaluation over sorted timestamp streams
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_burrow::{EngineConfig, Expression, Order, SegmentBatch, StorageEngine, TimeGenerator};
//!
//! let engine = StorageEngine::open(EngineConfig::new("/var/lib/burrow"))?;
//! let group = engine.create_group("root.sg")?;
//!
//! let mut batch = SegmentBatch::new();
//! batch.insert("root.sg.d1.s1", 1, 0.5);
//! batch.insert("root.sg.d1.s2", 1, 7.0);
//! group.flush(batch)?;
//!
//! let expr = Expression::and(
//!     Expression::series("root.sg.d1.s1"),
//!     Expression::series("root.sg.d1.s2"),
//! );
//! for ts in TimeGenerator::new(&engine, &expr, Order::Ascending)? {
//!     println!("{}", ts?);
//! }
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod query;
pub mod segment;
pub mod tombstone;

pub use compaction::{
    CandidateSelector, CompactionEngine, CompactionOutcome, CompactionScheduler,
    CompactionSummary, SequenceClassSelector,
};
pub use config::{CompactionConfig, EngineConfig, GroupConfig, SyncMode};
pub use engine::{PrefixResolver, SeriesResolver, StorageEngine};
pub use error::{BurrowError, Result};
pub use group::{
    CompactionSource, QuerySnapshot, SegmentBatch, SeriesView, SnapshotSet, SnapshotSource,
    StorageGroupProcessor,
};
pub use query::{CompareOp, Expression, Filter, Order, TimeGenerator};
pub use segment::{SegmentId, SegmentResource, SegmentStatus, TimeRange, Timestamp, Version};
pub use tombstone::{PathPattern, Tombstone, TombstoneJournal};
