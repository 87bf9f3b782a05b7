//! Visible points of one series.
//!
//! A reader merges every segment of a [`SeriesView`] in timestamp order. Segments are
//! loaded lazily, only once the merge reaches the first timestamp they can contribute.
//! At a shared timestamp the segment with the highest version wins; the winning point
//! is then checked against tombstones, the TTL bound and the leaf predicate.

use crate::error::Result;
use crate::group::SeriesView;
use crate::query::{Filter, Order};
use crate::segment::{SegmentId, SegmentResource, TimeRange, Timestamp, Version};
use crate::tombstone::{is_deleted, Tombstone};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

struct Cursor {
    points: Vec<(Timestamp, f64)>,
    pos: usize,
}

#[derive(PartialEq, Eq)]
struct Head {
    ts: Timestamp,
    version: Version,
    id: SegmentId,
    cursor: usize,
    order: Order,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_time = match self.order {
            Order::Ascending => other.ts.cmp(&self.ts),
            Order::Descending => self.ts.cmp(&other.ts),
        };
        by_time.then_with(|| (self.version, self.id).cmp(&(other.version, other.id)))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered stream of the visible points of one series.
pub struct SeriesReader {
    path: String,
    order: Order,
    pending: VecDeque<(TimeRange, Arc<SegmentResource>)>,
    cursors: Vec<Cursor>,
    heap: BinaryHeap<Head>,
    tombstones: Vec<Tombstone>,
    filter: Option<Filter>,
    time_filter: Option<Filter>,
    ttl_lower_bound: Option<Timestamp>,
}

impl SeriesReader {
    /// Prepares a reader; no segment is read until the first call to
    /// [`SeriesReader::next_point`].
    pub fn new(view: SeriesView, filter: Option<Filter>, order: Order) -> Self {
        let time_filter = filter.as_ref().and_then(Filter::time_component);
        let ttl_lower_bound = view.ttl_lower_bound;

        let mut pending: Vec<(TimeRange, Arc<SegmentResource>)> = view
            .segments
            .into_iter()
            .filter_map(|segment| Some((segment.series_range(&view.path)?, segment)))
            .filter(|(range, _)| ttl_lower_bound.map_or(true, |bound| range.end >= bound))
            .filter(|(range, _)| time_filter.as_ref().map_or(true, |f| f.may_overlap(range)))
            .collect();
        match order {
            Order::Ascending => pending.sort_by_key(|(range, s)| (range.start, s.id())),
            Order::Descending => {
                pending.sort_by_key(|(range, s)| (std::cmp::Reverse(range.end), s.id()))
            }
        }

        Self {
            path: view.path,
            order,
            pending: pending.into(),
            cursors: Vec::new(),
            heap: BinaryHeap::new(),
            tombstones: view.tombstones,
            filter,
            time_filter,
            ttl_lower_bound,
        }
    }

    /// Series path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next visible point, or `None` at the end of the series.
    pub fn next_point(&mut self) -> Result<Option<(Timestamp, f64)>> {
        loop {
            self.load_due()?;
            let Some(head) = self.heap.pop() else {
                return Ok(None);
            };
            let ts = head.ts;
            let version = head.version;
            let value = self.advance(head);
            while self.heap.peek().is_some_and(|next| next.ts == ts) {
                if let Some(shadowed) = self.heap.pop() {
                    self.advance(shadowed);
                }
            }

            if is_deleted(&self.tombstones, ts, version) {
                continue;
            }
            if self.ttl_lower_bound.is_some_and(|bound| ts < bound) {
                continue;
            }
            if let Some(filter) = &self.filter {
                if !filter.satisfy(ts, value) {
                    continue;
                }
            }
            return Ok(Some((ts, value)));
        }
    }

    fn advance(&mut self, head: Head) -> f64 {
        let cursor = &mut self.cursors[head.cursor];
        let value = cursor.points[cursor.pos].1;
        cursor.pos += 1;
        if let Some(&(ts, _)) = cursor.points.get(cursor.pos) {
            self.heap.push(Head { ts, ..head });
        }
        value
    }

    fn load_due(&mut self) -> Result<()> {
        while let Some((range, _)) = self.pending.front() {
            let due = match self.heap.peek() {
                None => true,
                Some(head) => match self.order {
                    Order::Ascending => range.start <= head.ts,
                    Order::Descending => range.end >= head.ts,
                },
            };
            if !due {
                break;
            }
            let Some((_, segment)) = self.pending.pop_front() else {
                break;
            };

            let mut points = segment.read_series(&self.path)?.unwrap_or_default();
            if let Some(filter) = &self.time_filter {
                points.retain(|&(ts, _)| filter.satisfy_time(ts));
            }
            if self.order == Order::Descending {
                points.reverse();
            }
            let Some(&(ts, _)) = points.first() else {
                continue;
            };
            self.cursors.push(Cursor { points, pos: 0 });
            self.heap.push(Head {
                ts,
                version: segment.version(),
                id: segment.id(),
                cursor: self.cursors.len() - 1,
                order: self.order,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SeriesReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesReader")
            .field("path", &self.path)
            .field("order", &self.order)
            .field("pending", &self.pending.len())
            .field("loaded", &self.cursors.len())
            .finish()
    }
}
