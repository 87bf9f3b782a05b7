//! Timestamp generation for filter expressions.
//!
//! The expression tree is mirrored by a tree of nodes, each yielding a strictly
//! monotonic stream of timestamps:
//!
//! - a leaf streams the visible points of one series
//! - AND advances whichever side is behind until both agree
//! - OR caches one head per side and emits the earlier, both on a tie
//! - a bare time predicate under an AND filters its sibling's stream
//!
//! Each node pulls from its children only when asked, so memory stays bounded by the
//! tree size plus the segments a leaf currently holds.

use crate::error::{BurrowError, Result};
use crate::group::{SnapshotSet, SnapshotSource};
use crate::query::expression::{Expression, ExpressionPlan};
use crate::query::reader::SeriesReader;
use crate::query::Filter;
use crate::segment::Timestamp;

/// Direction of a timestamp stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

impl Order {
    /// Returns true if `a` is emitted before `b`.
    pub fn precedes(self, a: Timestamp, b: Timestamp) -> bool {
        match self {
            Order::Ascending => a < b,
            Order::Descending => a > b,
        }
    }
}

struct Leaf {
    reader: SeriesReader,
    current: Option<(Timestamp, f64)>,
}

enum Node {
    Leaf(Box<Leaf>),
    And(Box<Node>, Box<Node>),
    Or {
        left: Box<Node>,
        right: Box<Node>,
        left_head: Option<Timestamp>,
        right_head: Option<Timestamp>,
    },
    Gate(Box<Node>, Filter),
}

enum Built {
    Stream(Node),
    TimeOnly(Filter),
}

impl Node {
    fn next(&mut self, order: Order) -> Result<Option<Timestamp>> {
        match self {
            Node::Leaf(leaf) => {
                leaf.current = leaf.reader.next_point()?;
                Ok(leaf.current.map(|(ts, _)| ts))
            }
            Node::And(left, right) => {
                let Some(mut l) = left.next(order)? else {
                    return Ok(None);
                };
                let Some(mut r) = right.next(order)? else {
                    return Ok(None);
                };
                while l != r {
                    if order.precedes(l, r) {
                        let Some(next) = left.next(order)? else {
                            return Ok(None);
                        };
                        l = next;
                    } else {
                        let Some(next) = right.next(order)? else {
                            return Ok(None);
                        };
                        r = next;
                    }
                }
                Ok(Some(l))
            }
            Node::Or {
                left,
                right,
                left_head,
                right_head,
            } => {
                if left_head.is_none() {
                    *left_head = left.next(order)?;
                }
                if right_head.is_none() {
                    *right_head = right.next(order)?;
                }
                let emitted = match (*left_head, *right_head) {
                    (None, None) => None,
                    (Some(l), None) => Some(l),
                    (None, Some(r)) => Some(r),
                    (Some(l), Some(r)) if order.precedes(r, l) => Some(r),
                    (Some(l), Some(_)) => Some(l),
                };
                if let Some(ts) = emitted {
                    if *left_head == Some(ts) {
                        *left_head = None;
                    }
                    if *right_head == Some(ts) {
                        *right_head = None;
                    }
                }
                Ok(emitted)
            }
            Node::Gate(inner, filter) => loop {
                match inner.next(order)? {
                    Some(ts) if filter.satisfy_time(ts) => return Ok(Some(ts)),
                    Some(_) => continue,
                    None => return Ok(None),
                }
            },
        }
    }

    fn value_at(&self, path: &str, ts: Timestamp) -> Option<f64> {
        match self {
            Node::Leaf(leaf) => match leaf.current {
                Some((at, value)) if at == ts && leaf.reader.path() == path => Some(value),
                _ => None,
            },
            Node::And(left, right) | Node::Or { left, right, .. } => left
                .value_at(path, ts)
                .or_else(|| right.value_at(path, ts)),
            Node::Gate(inner, _) => inner.value_at(path, ts),
        }
    }
}

/// Yields the timestamps satisfying an [`Expression`], strictly ordered and without
/// duplicates.
///
/// The snapshots captured at construction are held for the generator's lifetime, so
/// concurrent compactions do not change the result.
pub struct TimeGenerator {
    root: Node,
    order: Order,
    plan: ExpressionPlan,
    current: Option<Timestamp>,
    finished: bool,
    snapshots: SnapshotSet,
}

impl TimeGenerator {
    /// Validates `expression`, captures snapshots of every referenced series from
    /// `source` and prepares the node tree. No segment data is read yet.
    pub fn new<S>(source: &S, expression: &Expression, order: Order) -> Result<Self>
    where
        S: SnapshotSource + ?Sized,
    {
        expression.validate()?;
        let plan = expression.plan();
        let snapshots = source.acquire_snapshots(&plan.paths, plan.time_filter.as_ref())?;
        let root = match build(expression, &snapshots, order)? {
            Built::Stream(node) => node,
            Built::TimeOnly(_) => {
                return Err(BurrowError::InvalidExpression(
                    "expression references no series".into(),
                ))
            }
        };

        Ok(Self {
            root,
            order,
            plan,
            current: None,
            finished: false,
            snapshots,
        })
    }

    /// Stream direction.
    pub fn order(&self) -> Order {
        self.order
    }

    /// Paths and time filter derived from the expression.
    pub fn plan(&self) -> &ExpressionPlan {
        &self.plan
    }

    /// Snapshots the generator reads from.
    pub fn snapshots(&self) -> &SnapshotSet {
        &self.snapshots
    }

    /// Last emitted timestamp.
    pub fn current(&self) -> Option<Timestamp> {
        self.current
    }

    /// Next satisfying timestamp, or `None` once the stream is exhausted.
    ///
    /// After an error or the end of the stream every further call returns `None`.
    pub fn next_timestamp(&mut self) -> Result<Option<Timestamp>> {
        if self.finished {
            return Ok(None);
        }
        match self.root.next(self.order) {
            Ok(Some(ts)) => {
                self.current = Some(ts);
                Ok(Some(ts))
            }
            Ok(None) => {
                self.finished = true;
                self.current = None;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                self.current = None;
                Err(e)
            }
        }
    }

    /// Value of `path` at the current timestamp, if that series produced a point
    /// there.
    pub fn value(&self, path: &str) -> Option<f64> {
        self.root.value_at(path, self.current?)
    }
}

impl Iterator for TimeGenerator {
    type Item = Result<Timestamp>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_timestamp().transpose()
    }
}

impl std::iter::FusedIterator for TimeGenerator {}

impl std::fmt::Debug for TimeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeGenerator")
            .field("order", &self.order)
            .field("plan", &self.plan)
            .field("current", &self.current)
            .field("finished", &self.finished)
            .finish()
    }
}

fn build(expression: &Expression, snapshots: &SnapshotSet, order: Order) -> Result<Built> {
    Ok(match expression {
        Expression::Series { path, filter } => Built::Stream(Node::Leaf(Box::new(Leaf {
            reader: SeriesReader::new(snapshots.series_view(path), filter.clone(), order),
            current: None,
        }))),
        Expression::Time(filter) => Built::TimeOnly(filter.clone()),
        Expression::And(left, right) => {
            match (build(left, snapshots, order)?, build(right, snapshots, order)?) {
                (Built::Stream(l), Built::Stream(r)) => {
                    Built::Stream(Node::And(Box::new(l), Box::new(r)))
                }
                (Built::Stream(node), Built::TimeOnly(filter))
                | (Built::TimeOnly(filter), Built::Stream(node)) => {
                    Built::Stream(Node::Gate(Box::new(node), filter))
                }
                (Built::TimeOnly(l), Built::TimeOnly(r)) => Built::TimeOnly(Filter::and(l, r)),
            }
        }
        Expression::Or(left, right) => {
            match (build(left, snapshots, order)?, build(right, snapshots, order)?) {
                (Built::Stream(l), Built::Stream(r)) => Built::Stream(Node::Or {
                    left: Box::new(l),
                    right: Box::new(r),
                    left_head: None,
                    right_head: None,
                }),
                (Built::TimeOnly(l), Built::TimeOnly(r)) => Built::TimeOnly(Filter::or(l, r)),
                _ => {
                    return Err(BurrowError::InvalidExpression(
                        "OR of a series and a bare time predicate is unbounded".into(),
                    ))
                }
            }
        }
    })
}
