//! Storage engine: the set of storage groups under one data directory.
//!
//! ```text
//! <data_dir>/
//!   root.sg1/      one directory per storage group
//!   root.sg2/
//! ```

use crate::config::EngineConfig;
use crate::error::{BurrowError, Result};
use crate::group::{SnapshotSet, SnapshotSource, StorageGroupProcessor};
use crate::query::Filter;
use crate::segment::TimeRange;
use crate::tombstone::PathPattern;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Arc;
use tracing::{debug, info};

/// Maps a series path to the name of the storage group owning it.
pub trait SeriesResolver: Send + Sync {
    /// Resolves `path` among the `groups` currently open.
    fn resolve(&self, path: &str, groups: &[String]) -> Result<String>;
}

/// Resolves a path to the longest group name that is a node prefix of it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixResolver;

impl SeriesResolver for PrefixResolver {
    fn resolve(&self, path: &str, groups: &[String]) -> Result<String> {
        groups
            .iter()
            .filter(|group| is_node_prefix(group, path))
            .max_by_key(|group| group.len())
            .cloned()
            .ok_or_else(|| BurrowError::SeriesUnresolved(path.to_string()))
    }
}

fn is_node_prefix(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

/// Storage groups of one data directory.
///
/// `groups` is held only for map lookups and inserts. Opening a new group runs under
/// `creating`, outside of `groups`.
pub struct StorageEngine {
    config: EngineConfig,
    groups: RwLock<BTreeMap<String, Arc<StorageGroupProcessor>>>,
    creating: Mutex<()>,
    resolver: Box<dyn SeriesResolver>,
}

impl StorageEngine {
    /// Opens every group found in the data directory, creating the directory if needed.
    pub fn open(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let mut groups = BTreeMap::new();
        for entry in fs::read_dir(&config.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let group = StorageGroupProcessor::open(&name, entry.path(), config.group.clone())?;
            groups.insert(name, Arc::new(group));
        }

        info!(
            "Opened storage engine at {:?} with {} groups",
            config.data_dir,
            groups.len()
        );
        Ok(Self {
            config,
            groups: RwLock::new(groups),
            creating: Mutex::new(()),
            resolver: Box::new(PrefixResolver),
        })
    }

    /// Replaces the series resolver.
    pub fn with_resolver(mut self, resolver: impl SeriesResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens the group `name`, creating it if it does not exist yet.
    pub fn create_group(&self, name: &str) -> Result<Arc<StorageGroupProcessor>> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(BurrowError::StorageEngine(format!(
                "invalid storage group name {:?}",
                name
            )));
        }

        let _creating = self.creating.lock();
        if let Some(group) = self.groups.read().get(name) {
            return Ok(Arc::clone(group));
        }
        let group = Arc::new(StorageGroupProcessor::open(
            name,
            self.config.data_dir.join(name),
            self.config.group.clone(),
        )?);
        self.groups
            .write()
            .insert(name.to_string(), Arc::clone(&group));
        info!("Created storage group {}", name);
        Ok(group)
    }

    /// Looks up an open group.
    pub fn group(&self, name: &str) -> Result<Arc<StorageGroupProcessor>> {
        self.groups
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BurrowError::GroupNotFound(name.to_string()))
    }

    /// Every open group, ordered by name.
    pub fn groups(&self) -> Vec<Arc<StorageGroupProcessor>> {
        self.groups.read().values().cloned().collect()
    }

    /// Group owning the series `path`.
    pub fn resolve(&self, path: &str) -> Result<Arc<StorageGroupProcessor>> {
        let names: Vec<String> = self.groups.read().keys().cloned().collect();
        let name = self.resolver.resolve(path, &names)?;
        self.group(&name)
    }

    /// Deletes matching points in every group the pattern can reach.
    ///
    /// Returns the number of segments a tombstone was attached to.
    pub fn delete(&self, pattern: &PathPattern, range: TimeRange) -> Result<usize> {
        let mut attached = 0;
        for group in self.groups() {
            if pattern.may_match_prefix(group.name()) {
                attached += group.delete(pattern, range)?;
            }
        }
        Ok(attached)
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("config", &self.config)
            .field("groups", &self.groups.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SnapshotSource for StorageEngine {
    fn acquire_snapshots(
        &self,
        paths: &BTreeSet<String>,
        time_filter: Option<&Filter>,
    ) -> Result<SnapshotSet> {
        let mut by_group: BTreeMap<String, (Arc<StorageGroupProcessor>, BTreeSet<String>)> =
            BTreeMap::new();
        for path in paths {
            let group = self.resolve(path)?;
            by_group
                .entry(group.name().to_string())
                .or_insert_with(|| (group, BTreeSet::new()))
                .1
                .insert(path.clone());
        }

        let mut set = SnapshotSet::new();
        for (name, (group, group_paths)) in by_group {
            debug!("Acquiring snapshot of {} series in group {}", group_paths.len(), name);
            set.insert(group.acquire_snapshot_with_filter(&group_paths, time_filter)?);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GroupConfig, SyncMode};
    use crate::group::SegmentBatch;
    use tempfile::TempDir;

    fn open_engine(dir: &TempDir) -> StorageEngine {
        StorageEngine::open(
            EngineConfig::new(dir.path())
                .with_group(GroupConfig::default().with_sync_mode(SyncMode::None)),
        )
        .unwrap()
    }

    #[test]
    fn test_prefix_resolution_prefers_longest_group() {
        let groups = vec!["root.sg".to_string(), "root.sg.deep".to_string()];
        let resolver = PrefixResolver;
        assert_eq!(resolver.resolve("root.sg.d1.s1", &groups).unwrap(), "root.sg");
        assert_eq!(resolver.resolve("root.sg.deep.s1", &groups).unwrap(), "root.sg.deep");
        assert!(matches!(
            resolver.resolve("root.sgx.d1", &groups),
            Err(BurrowError::SeriesUnresolved(_))
        ));
    }

    #[test]
    fn test_concurrent_create_opens_group_once() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        let existing = engine.create_group("root.sg1").unwrap();
        existing
            .flush([("root.sg1.d1.s1", 1, 1.0)].into_iter().collect::<SegmentBatch>())
            .unwrap();

        let created: Vec<Arc<StorageGroupProcessor>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| engine.create_group("root.sg2").unwrap()))
                .collect();
            let paths: BTreeSet<String> = ["root.sg1.d1.s1".to_string()].into();
            for _ in 0..20 {
                let set = engine.acquire_snapshots(&paths, None).unwrap();
                assert_eq!(set.snapshots()[0].segments().len(), 1);
            }
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(created.iter().all(|g| Arc::ptr_eq(g, &created[0])));
        assert!(Arc::ptr_eq(&engine.group("root.sg2").unwrap(), &created[0]));
        assert_eq!(engine.groups().len(), 2);
    }

    #[test]
    fn test_groups_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open_engine(&dir);
            let group = engine.create_group("root.sg1").unwrap();
            let mut batch = SegmentBatch::new();
            batch.insert("root.sg1.d1.s1", 1, 1.0);
            group.flush(batch).unwrap();
            engine.create_group("root.sg2").unwrap();
            assert!(engine.create_group("../escape").is_err());
        }
        let engine = open_engine(&dir);
        assert_eq!(engine.groups().len(), 2);
        assert_eq!(engine.group("root.sg1").unwrap().segments().len(), 1);
        assert!(matches!(engine.group("root.sg3"), Err(BurrowError::GroupNotFound(_))));
    }

    #[test]
    fn test_delete_fans_out_to_reachable_groups() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        for name in ["root.sg1", "root.sg2"] {
            let group = engine.create_group(name).unwrap();
            let mut batch = SegmentBatch::new();
            batch.insert(format!("{}.d1.s1", name), 1, 1.0);
            group.flush(batch).unwrap();
        }
        let all = engine
            .delete(&PathPattern::new("root.*.d1.s1"), TimeRange::all())
            .unwrap();
        assert_eq!(all, 2);
        let one = engine
            .delete(&PathPattern::new("root.sg2.**"), TimeRange::all())
            .unwrap();
        assert_eq!(one, 1);
    }
}
