//! Timestamp generation over AND/OR expressions.
//!
//! Uses proptest to compare merged streams with a `BTreeSet` model.

use alopex_burrow::{
    BurrowError, CompareOp, EngineConfig, Expression, Filter, GroupConfig, Order, SegmentBatch,
    StorageEngine, StorageGroupProcessor, SyncMode, TimeGenerator,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const S1: &str = "root.sg.d1.s1";
const S2: &str = "root.sg.d1.s2";

fn open_group(dir: &Path) -> StorageGroupProcessor {
    StorageGroupProcessor::open(
        "root.sg",
        dir,
        GroupConfig::default().with_sync_mode(SyncMode::None),
    )
    .unwrap()
}

fn flush_series(group: &StorageGroupProcessor, path: &str, points: &[(i64, f64)]) {
    let batch: SegmentBatch = points.iter().map(|&(ts, v)| (path, ts, v)).collect();
    group.flush(batch).unwrap();
}

fn timestamps(group: &StorageGroupProcessor, expr: &Expression, order: Order) -> Vec<i64> {
    TimeGenerator::new(group, expr, order)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn both() -> (Expression, Expression) {
    (Expression::series(S1), Expression::series(S2))
}

fn setup(dir: &Path) -> StorageGroupProcessor {
    let group = open_group(dir);
    flush_series(&group, S1, &[(1, 1.0), (2, 2.0), (3, 3.0)]);
    flush_series(&group, S2, &[(2, 20.0), (3, 30.0), (4, 40.0)]);
    group
}

#[test]
fn test_and_or_of_two_series() {
    let temp_dir = TempDir::new().unwrap();
    let group = setup(temp_dir.path());
    let (s1, s2) = both();

    let and = Expression::and(s1.clone(), s2.clone());
    let or = Expression::or(s1, s2);
    assert_eq!(timestamps(&group, &and, Order::Ascending), vec![2, 3]);
    assert_eq!(timestamps(&group, &or, Order::Ascending), vec![1, 2, 3, 4]);
    assert_eq!(timestamps(&group, &and, Order::Descending), vec![3, 2]);
    assert_eq!(timestamps(&group, &or, Order::Descending), vec![4, 3, 2, 1]);
}

#[test]
fn test_values_follow_current_timestamp() {
    let temp_dir = TempDir::new().unwrap();
    let group = setup(temp_dir.path());
    let (s1, s2) = both();

    let mut generator =
        TimeGenerator::new(&group, &Expression::or(s1, s2), Order::Ascending).unwrap();
    assert_eq!(generator.value(S1), None);

    let mut rows = Vec::new();
    while let Some(ts) = generator.next_timestamp().unwrap() {
        assert_eq!(generator.current(), Some(ts));
        rows.push((ts, generator.value(S1), generator.value(S2)));
    }
    assert_eq!(
        rows,
        vec![
            (1, Some(1.0), None),
            (2, Some(2.0), Some(20.0)),
            (3, Some(3.0), Some(30.0)),
            (4, None, Some(40.0)),
        ]
    );
    assert_eq!(generator.next_timestamp().unwrap(), None);
    assert!(generator.next().is_none());
}

#[test]
fn test_time_and_value_predicates() {
    let temp_dir = TempDir::new().unwrap();
    let group = setup(temp_dir.path());

    let gated = Expression::and(
        Expression::series(S1),
        Expression::time(Filter::time(CompareOp::Gt, 1)),
    );
    assert_eq!(timestamps(&group, &gated, Order::Ascending), vec![2, 3]);

    let valued = Expression::or(
        Expression::series_with(S1, Filter::value(CompareOp::LtEq, 1.0)),
        Expression::series_with(S2, Filter::value(CompareOp::GtEq, 40.0)),
    );
    assert_eq!(timestamps(&group, &valued, Order::Ascending), vec![1, 4]);

    let window = Expression::and(
        Expression::series_with(S2, Filter::time_between(3, 10)),
        Expression::time(Filter::negate(Filter::time(CompareOp::Eq, 4))),
    );
    assert_eq!(timestamps(&group, &window, Order::Descending), vec![3]);
}

#[test]
fn test_newer_segment_wins_at_shared_timestamp() {
    let temp_dir = TempDir::new().unwrap();
    let group = open_group(temp_dir.path());
    flush_series(&group, S1, &[(1, 1.0), (5, 5.0), (9, 9.0)]);
    flush_series(&group, S1, &[(5, 50.0), (6, 60.0)]);
    flush_series(&group, S1, &[(0, 0.5), (9, 90.0)]);

    let mut generator =
        TimeGenerator::new(&group, &Expression::series(S1), Order::Ascending).unwrap();
    let mut rows = Vec::new();
    while let Some(ts) = generator.next_timestamp().unwrap() {
        rows.push((ts, generator.value(S1).unwrap()));
    }
    assert_eq!(
        rows,
        vec![(0, 0.5), (1, 1.0), (5, 50.0), (6, 60.0), (9, 90.0)]
    );
}

#[test]
fn test_rejected_expressions() {
    let temp_dir = TempDir::new().unwrap();
    let group = setup(temp_dir.path());
    let invalid = [
        Expression::time(Filter::time(CompareOp::Gt, 1)),
        Expression::or(
            Expression::series(S1),
            Expression::time(Filter::time(CompareOp::Gt, 1)),
        ),
        Expression::and(
            Expression::series(S1),
            Expression::time(Filter::value(CompareOp::Gt, 1.0)),
        ),
    ];
    for expr in &invalid {
        let err = TimeGenerator::new(&group, expr, Order::Ascending).unwrap_err();
        assert!(matches!(err, BurrowError::InvalidExpression(_)), "{:?}", err);
    }
}

#[test]
fn test_ttl_hides_expired_points() {
    let temp_dir = TempDir::new().unwrap();
    let group = StorageGroupProcessor::open(
        "root.sg",
        temp_dir.path(),
        GroupConfig::default()
            .with_sync_mode(SyncMode::None)
            .with_ttl(Duration::from_secs(3600)),
    )
    .unwrap();
    flush_series(&group, S1, &[(1, 1.0), (2, 2.0)]);
    assert!(timestamps(&group, &Expression::series(S1), Order::Ascending).is_empty());
}

#[test]
fn test_expression_spanning_groups() {
    let temp_dir = TempDir::new().unwrap();
    let engine = StorageEngine::open(
        EngineConfig::new(temp_dir.path())
            .with_group(GroupConfig::default().with_sync_mode(SyncMode::None)),
    )
    .unwrap();
    let a = engine.create_group("root.a").unwrap();
    let b = engine.create_group("root.b").unwrap();
    flush_series(&a, "root.a.d1.s1", &[(1, 1.0), (2, 2.0)]);
    flush_series(&b, "root.b.d1.s1", &[(2, 2.0), (3, 3.0)]);

    let expr = Expression::and(
        Expression::series("root.a.d1.s1"),
        Expression::series("root.b.d1.s1"),
    );
    let generator = TimeGenerator::new(&engine, &expr, Order::Ascending).unwrap();
    assert_eq!(generator.snapshots().snapshots().len(), 2);
    assert_eq!(generator.collect::<Result<Vec<_>, _>>().unwrap(), vec![2]);

    let missing = Expression::series("root.c.d1.s1");
    let err = TimeGenerator::new(&engine, &missing, Order::Ascending).unwrap_err();
    assert!(err.is_storage_engine_error());
}

fn points_of(set: &BTreeSet<i64>) -> Vec<(i64, f64)> {
    set.iter().map(|&ts| (ts, ts as f64)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_merge_matches_set_model(
        a in prop::collection::btree_set(-50i64..50, 0..30),
        b in prop::collection::btree_set(-50i64..50, 0..30),
        c in prop::collection::btree_set(-50i64..50, 0..30),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let group = open_group(temp_dir.path());
        let s3 = "root.sg.d1.s3";
        if !a.is_empty() { flush_series(&group, S1, &points_of(&a)); }
        if !b.is_empty() { flush_series(&group, S2, &points_of(&b)); }
        if !c.is_empty() { flush_series(&group, s3, &points_of(&c)); }

        let (s1, s2) = both();
        let expr = Expression::or(Expression::and(s1, s2), Expression::series(s3));
        let model: BTreeSet<i64> = a.intersection(&b).copied().collect::<BTreeSet<_>>()
            .union(&c).copied().collect();

        let ascending = timestamps(&group, &expr, Order::Ascending);
        prop_assert_eq!(&ascending, &model.iter().copied().collect::<Vec<_>>());
        let descending = timestamps(&group, &expr, Order::Descending);
        prop_assert_eq!(descending, model.iter().rev().copied().collect::<Vec<_>>());
    }
}
