//! Point filters over `(time, value)`.

use crate::segment::{TimeRange, Timestamp};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    fn eval<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::NotEq => lhs != rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::LtEq => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::GtEq => lhs >= rhs,
        }
    }
}

/// Boolean filter over a point's timestamp and value.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `time <op> literal`
    Time(CompareOp, Timestamp),
    /// `value <op> literal`
    Value(CompareOp, f64),
    /// Both hold.
    And(Box<Filter>, Box<Filter>),
    /// Either holds.
    Or(Box<Filter>, Box<Filter>),
    /// Negation.
    Not(Box<Filter>),
}

impl Filter {
    /// `time <op> ts`
    pub fn time(op: CompareOp, ts: Timestamp) -> Self {
        Filter::Time(op, ts)
    }

    /// `value <op> literal`
    pub fn value(op: CompareOp, literal: f64) -> Self {
        Filter::Value(op, literal)
    }

    /// `start <= time <= end`
    pub fn time_between(start: Timestamp, end: Timestamp) -> Self {
        Filter::and(
            Filter::Time(CompareOp::GtEq, start),
            Filter::Time(CompareOp::LtEq, end),
        )
    }

    /// Conjunction.
    pub fn and(left: Filter, right: Filter) -> Self {
        Filter::And(Box::new(left), Box::new(right))
    }

    /// Disjunction.
    pub fn or(left: Filter, right: Filter) -> Self {
        Filter::Or(Box::new(left), Box::new(right))
    }

    /// Negation.
    pub fn negate(inner: Filter) -> Self {
        Filter::Not(Box::new(inner))
    }

    /// Evaluates the filter on one point.
    pub fn satisfy(&self, ts: Timestamp, value: f64) -> bool {
        match self {
            Filter::Time(op, literal) => op.eval(ts, *literal),
            Filter::Value(op, literal) => op.eval(value, *literal),
            Filter::And(l, r) => l.satisfy(ts, value) && r.satisfy(ts, value),
            Filter::Or(l, r) => l.satisfy(ts, value) || r.satisfy(ts, value),
            Filter::Not(inner) => !inner.satisfy(ts, value),
        }
    }

    /// Evaluates a time-only filter on a timestamp.
    ///
    /// Only meaningful when [`Filter::is_time_only`] holds.
    pub fn satisfy_time(&self, ts: Timestamp) -> bool {
        match self {
            Filter::Time(op, literal) => op.eval(ts, *literal),
            Filter::Value(..) => true,
            Filter::And(l, r) => l.satisfy_time(ts) && r.satisfy_time(ts),
            Filter::Or(l, r) => l.satisfy_time(ts) || r.satisfy_time(ts),
            Filter::Not(inner) => !inner.satisfy_time(ts),
        }
    }

    /// Returns true if the filter can be decided without reading values.
    pub fn is_time_only(&self) -> bool {
        match self {
            Filter::Time(..) => true,
            Filter::Value(..) => false,
            Filter::And(l, r) | Filter::Or(l, r) => l.is_time_only() && r.is_time_only(),
            Filter::Not(inner) => inner.is_time_only(),
        }
    }

    /// Returns false only if no timestamp in `range` can satisfy the filter.
    pub fn may_overlap(&self, range: &TimeRange) -> bool {
        if range.is_empty() {
            return false;
        }
        match self {
            Filter::Time(op, t) => match op {
                CompareOp::Eq => range.contains(*t),
                CompareOp::NotEq => !(range.start == range.end && range.start == *t),
                CompareOp::Lt => range.start < *t,
                CompareOp::LtEq => range.start <= *t,
                CompareOp::Gt => range.end > *t,
                CompareOp::GtEq => range.end >= *t,
            },
            Filter::Value(..) | Filter::Not(_) => true,
            Filter::And(l, r) => l.may_overlap(range) && r.may_overlap(range),
            Filter::Or(l, r) => l.may_overlap(range) || r.may_overlap(range),
        }
    }

    /// Extracts a time-only filter implied by this one.
    ///
    /// The result is a necessary condition: every point passing `self` passes it. An AND
    /// keeps whatever its sides supply; an OR yields one only if both sides do.
    pub fn time_component(&self) -> Option<Filter> {
        if self.is_time_only() {
            return Some(self.clone());
        }
        match self {
            Filter::And(l, r) => match (l.time_component(), r.time_component()) {
                (Some(l), Some(r)) => Some(Filter::and(l, r)),
                (Some(one), None) | (None, Some(one)) => Some(one),
                (None, None) => None,
            },
            Filter::Or(l, r) => match (l.time_component(), r.time_component()) {
                (Some(l), Some(r)) => Some(Filter::or(l, r)),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satisfy() {
        let f = Filter::and(
            Filter::time(CompareOp::Gt, 10),
            Filter::value(CompareOp::LtEq, 5.0),
        );
        assert!(f.satisfy(11, 5.0));
        assert!(!f.satisfy(10, 5.0));
        assert!(!f.satisfy(11, 5.5));
        assert!(Filter::negate(f).satisfy(10, 5.0));
    }

    #[test]
    fn test_time_component_and_keeps_one_side() {
        let f = Filter::and(
            Filter::time(CompareOp::Gt, 100),
            Filter::value(CompareOp::Gt, 1.0),
        );
        assert_eq!(f.time_component(), Some(Filter::time(CompareOp::Gt, 100)));
    }

    #[test]
    fn test_time_component_or_needs_both_sides() {
        let partial = Filter::or(
            Filter::time(CompareOp::Gt, 100),
            Filter::value(CompareOp::Gt, 1.0),
        );
        assert_eq!(partial.time_component(), None);

        let both = Filter::or(
            Filter::and(
                Filter::time(CompareOp::Lt, 5),
                Filter::value(CompareOp::Eq, 1.0),
            ),
            Filter::time(CompareOp::Gt, 100),
        );
        assert_eq!(
            both.time_component(),
            Some(Filter::or(
                Filter::time(CompareOp::Lt, 5),
                Filter::time(CompareOp::Gt, 100)
            ))
        );
    }

    #[test]
    fn test_time_component_is_necessary_condition() {
        let f = Filter::or(
            Filter::and(
                Filter::time(CompareOp::Lt, 5),
                Filter::value(CompareOp::Eq, 1.0),
            ),
            Filter::time(CompareOp::Gt, 100),
        );
        let time = f.time_component().unwrap();
        for ts in -10..200 {
            for value in [0.0, 1.0] {
                if f.satisfy(ts, value) {
                    assert!(time.satisfy_time(ts));
                }
            }
        }
    }

    #[test]
    fn test_may_overlap() {
        let range = TimeRange::new(10, 20);
        assert!(Filter::time(CompareOp::Gt, 19).may_overlap(&range));
        assert!(!Filter::time(CompareOp::Gt, 20).may_overlap(&range));
        assert!(!Filter::time(CompareOp::Lt, 10).may_overlap(&range));
        assert!(Filter::time_between(15, 30).may_overlap(&range));
        assert!(!Filter::time_between(21, 30).may_overlap(&range));
        assert!(Filter::value(CompareOp::Eq, 0.0).may_overlap(&range));
        assert!(!Filter::value(CompareOp::Eq, 0.0).may_overlap(&TimeRange::empty()));
    }
}
