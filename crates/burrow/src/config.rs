//! Configuration for storage groups, compaction and the engine.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default minimum number of segments merged by one compaction task.
pub const DEFAULT_MIN_SEGMENTS: usize = 2;

/// Default maximum number of segments merged by one compaction task.
pub const DEFAULT_MAX_SEGMENTS: usize = 10;

/// Default interval between scheduler sweeps over all groups.
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(30);

/// Sync mode for journal, compaction log and segment durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync after each write (default, highest durability).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update, faster).
    Fdatasync,
    /// No sync (fastest, lowest durability - for testing only).
    None,
}

impl SyncMode {
    /// Makes previously written bytes of `file` durable according to the mode.
    pub fn sync(self, file: &File) -> io::Result<()> {
        match self {
            SyncMode::Fsync => file.sync_all(),
            SyncMode::Fdatasync => file.sync_data(),
            SyncMode::None => Ok(()),
        }
    }

    /// Syncs a directory so that renames and unlinks inside it survive a crash.
    ///
    /// Directory handles cannot be synced on every platform; failures are ignored there.
    pub fn sync_dir(self, dir: &Path) {
        if self == SyncMode::None {
            return;
        }
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

/// Per storage group settings.
#[derive(Debug, Clone, Default)]
pub struct GroupConfig {
    /// Durability of every file written by the group.
    pub sync_mode: SyncMode,
    /// Data older than `now - ttl` is invisible to queries.
    pub ttl: Option<Duration>,
}

impl GroupConfig {
    /// Sets the sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Sets the time-to-live of the group's data.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Compaction task sizing and scheduling.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Fewer eligible segments than this means there is nothing to do.
    pub min_segments: usize,
    /// Upper bound on sources per task.
    pub max_segments: usize,
    /// Whether sequence segments are compacted.
    pub enable_sequence: bool,
    /// Whether out-of-order segments are compacted.
    pub enable_unsequence: bool,
    /// Scheduler tick.
    pub interval: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_segments: DEFAULT_MIN_SEGMENTS,
            max_segments: DEFAULT_MAX_SEGMENTS,
            enable_sequence: true,
            enable_unsequence: true,
            interval: DEFAULT_COMPACTION_INTERVAL,
        }
    }
}

impl CompactionConfig {
    /// Sets the bounds on sources per task.
    pub fn with_segment_bounds(mut self, min_segments: usize, max_segments: usize) -> Self {
        self.min_segments = min_segments.max(2);
        self.max_segments = max_segments.max(self.min_segments);
        self
    }

    /// Sets the scheduler tick.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Enables or disables compaction per sequence class.
    pub fn with_classes(mut self, sequence: bool, unsequence: bool) -> Self {
        self.enable_sequence = sequence;
        self.enable_unsequence = unsequence;
        self
    }
}

/// Top level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory; every storage group lives in a subdirectory.
    pub data_dir: PathBuf,
    /// Settings applied to every group.
    pub group: GroupConfig,
    /// Compaction settings.
    pub compaction: CompactionConfig,
}

impl EngineConfig {
    /// Creates a configuration rooted at `data_dir` with default settings.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            group: GroupConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }

    /// Replaces the group settings.
    pub fn with_group(mut self, group: GroupConfig) -> Self {
        self.group = group;
        self
    }

    /// Replaces the compaction settings.
    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_bounds_are_clamped() {
        let config = CompactionConfig::default().with_segment_bounds(0, 1);
        assert_eq!(config.min_segments, 2);
        assert_eq!(config.max_segments, 2);
    }

    #[test]
    fn test_engine_config_builders() {
        let config = EngineConfig::new("/tmp/burrow")
            .with_group(GroupConfig::default().with_sync_mode(SyncMode::None))
            .with_compaction(CompactionConfig::default().with_classes(true, false));
        assert_eq!(config.group.sync_mode, SyncMode::None);
        assert!(config.compaction.enable_sequence);
        assert!(!config.compaction.enable_unsequence);
        assert!(config.group.ttl.is_none());
    }
}
