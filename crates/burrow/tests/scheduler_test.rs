//! Background compaction on a multi-threaded runtime.

use alopex_burrow::{
    CompactionConfig, CompactionEngine, CompactionScheduler, EngineConfig, GroupConfig,
    SegmentBatch, StorageEngine, SyncMode,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open_engine(dir: &TempDir) -> Arc<StorageEngine> {
    Arc::new(
        StorageEngine::open(
            EngineConfig::new(dir.path())
                .with_group(GroupConfig::default().with_sync_mode(SyncMode::None)),
        )
        .unwrap(),
    )
}

async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    done()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submitted_groups_are_compacted() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_engine(&temp_dir);
    let groups: Vec<_> = ["root.a", "root.b"]
        .iter()
        .map(|name| storage.create_group(name).unwrap())
        .collect();

    for group in &groups {
        for ts in 0..4 {
            let mut batch = SegmentBatch::new();
            batch.insert(format!("{}.d1.s1", group.name()), ts, ts as f64);
            group.flush(batch).unwrap();
        }
    }

    let compactor = Arc::new(CompactionEngine::new(
        CompactionConfig::default().with_interval(Duration::from_secs(3600)),
    ));
    let scheduler = CompactionScheduler::start(Arc::clone(&storage), compactor);
    for group in &groups {
        scheduler.submit(group.name()).unwrap();
    }
    scheduler.submit("root.unknown").unwrap();

    let compacted = wait_for(|| groups.iter().all(|g| g.segments().len() == 1)).await;
    assert!(compacted);
    for group in &groups {
        assert_eq!(group.segments()[0].level(), 1);
    }

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_periodic_sweep_reaches_every_group() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_engine(&temp_dir);
    let group = storage.create_group("root.sg").unwrap();
    for ts in 0..3 {
        let mut batch = SegmentBatch::new();
        batch.insert("root.sg.d1.s1", ts, 1.0);
        group.flush(batch).unwrap();
    }

    let compactor = Arc::new(CompactionEngine::new(
        CompactionConfig::default().with_interval(Duration::from_millis(20)),
    ));
    let scheduler = CompactionScheduler::start(Arc::clone(&storage), compactor);

    assert!(wait_for(|| group.segments().len() == 1).await);
    scheduler.shutdown().await.unwrap();
}
