//! Benchmarks for Burrow components.
//!
//! Run with: cargo bench --package alopex-burrow
//!
//! ## Benchmark Categories
//!
//! - **Tombstone Journal**: Append and replay
//! - **Segment Flush**: Sealing a batch into a segment
//! - **Compaction**: Merging segments with tombstones
//! - **Time Generator**: AND/OR merge throughput

use alopex_burrow::{
    CompactionConfig, CompactionEngine, Expression, GroupConfig, Order, PathPattern,
    SegmentBatch, StorageGroupProcessor, SyncMode, TimeGenerator, TimeRange, Tombstone,
    TombstoneJournal,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::path::Path;
use tempfile::TempDir;

fn open_group(dir: &Path) -> StorageGroupProcessor {
    StorageGroupProcessor::open(
        "root.sg",
        dir,
        GroupConfig::default().with_sync_mode(SyncMode::None),
    )
    .unwrap()
}

/// Regular one second samples with a slowly varying value.
fn batch(path: &str, start: i64, count: usize, stride: i64) -> SegmentBatch {
    let mut batch = SegmentBatch::new();
    let mut value = 50.0;
    for i in 0..count {
        value += (i as f64 * 0.1).sin() * 0.1;
        batch.insert(path, start + i as i64 * stride, value);
    }
    batch
}

fn bench_journal_append(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let journal =
        TombstoneJournal::open(temp_dir.path().join("bench.mods"), SyncMode::None).unwrap();
    let tombstone = Tombstone::new("root.sg.*.s1", TimeRange::new(0, 1_000), 1);

    c.bench_function("journal_append", |b| {
        b.iter(|| journal.append(black_box(&tombstone)).unwrap())
    });
}

fn bench_journal_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_replay");
    for count in [100usize, 1_000] {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bench.mods");
        let journal = TombstoneJournal::open(&path, SyncMode::None).unwrap();
        for i in 0..count {
            journal
                .append(&Tombstone::new(
                    format!("root.sg.d{}.s1", i),
                    TimeRange::new(0, i as i64),
                    i as u64,
                ))
                .unwrap();
        }
        drop(journal);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &path, |b, path| {
            b.iter(|| {
                TombstoneJournal::open(path, SyncMode::None)
                    .unwrap()
                    .read_all()
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let group = open_group(temp_dir.path());
    let mut next = 0i64;

    let mut bench = c.benchmark_group("flush");
    bench.throughput(Throughput::Elements(10_000));
    bench.bench_function("flush_10k", |b| {
        b.iter(|| {
            next += 10_000;
            group
                .flush(batch("root.sg.d1.s1", next, 10_000, 1))
                .unwrap()
        })
    });
    bench.finish();
}

fn bench_compaction(c: &mut Criterion) {
    let engine = CompactionEngine::new(CompactionConfig::default().with_segment_bounds(2, 8));

    c.bench_function("compact_8x5k_with_tombstones", |b| {
        b.iter_with_setup(
            || {
                let temp_dir = TempDir::new().unwrap();
                let group = open_group(temp_dir.path());
                for i in 0..8 {
                    group
                        .flush(batch("root.sg.d1.s1", i * 5_000, 5_000, 1))
                        .unwrap();
                }
                group
                    .delete(&PathPattern::new("root.sg.**"), TimeRange::new(1_000, 9_000))
                    .unwrap();
                (temp_dir, group)
            },
            |(_temp_dir, group)| engine.run_once(&group),
        )
    });
}

fn bench_generator(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let group = open_group(temp_dir.path());
    group.flush(batch("root.sg.d1.s1", 0, 50_000, 2)).unwrap();
    group.flush(batch("root.sg.d1.s2", 0, 50_000, 3)).unwrap();

    let s1 = Expression::series("root.sg.d1.s1");
    let s2 = Expression::series("root.sg.d1.s2");
    let cases = [
        ("and", Expression::and(s1.clone(), s2.clone())),
        ("or", Expression::or(s1, s2)),
    ];

    let mut bench = c.benchmark_group("time_generator");
    bench.throughput(Throughput::Elements(100_000));
    for (name, expr) in &cases {
        bench.bench_with_input(BenchmarkId::from_parameter(name), expr, |b, expr| {
            b.iter(|| {
                TimeGenerator::new(&group, expr, Order::Ascending)
                    .unwrap()
                    .filter_map(Result::ok)
                    .count()
            })
        });
    }
    bench.finish();
}

criterion_group!(
    benches,
    bench_journal_append,
    bench_journal_replay,
    bench_flush,
    bench_compaction,
    bench_generator,
);
criterion_main!(benches);
