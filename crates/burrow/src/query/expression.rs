//! Filter expressions over series.
//!
//! Leaves are series predicates or bare time predicates; inner nodes are AND and OR.
//! A bare time predicate only restricts its sibling series under an AND, it cannot
//! enumerate timestamps by itself.

use crate::error::{BurrowError, Result};
use crate::query::Filter;
use std::collections::BTreeSet;

/// Expression tree evaluated by [`crate::query::TimeGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Timestamps at which `path` has a visible point passing `filter`.
    Series {
        /// Series path.
        path: String,
        /// Optional predicate over `(time, value)`.
        filter: Option<Filter>,
    },
    /// Bare time predicate.
    Time(Filter),
    /// Intersection.
    And(Box<Expression>, Box<Expression>),
    /// Union.
    Or(Box<Expression>, Box<Expression>),
}

/// What an expression needs from storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionPlan {
    /// Time-only condition every result satisfies, usable to prune segments.
    pub time_filter: Option<Filter>,
    /// Series paths referenced by the expression.
    pub paths: BTreeSet<String>,
}

impl Expression {
    /// Series leaf without a predicate.
    pub fn series(path: impl Into<String>) -> Self {
        Expression::Series {
            path: path.into(),
            filter: None,
        }
    }

    /// Series leaf with a predicate.
    pub fn series_with(path: impl Into<String>, filter: Filter) -> Self {
        Expression::Series {
            path: path.into(),
            filter: Some(filter),
        }
    }

    /// Bare time predicate.
    pub fn time(filter: Filter) -> Self {
        Expression::Time(filter)
    }

    /// `left AND right`.
    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And(Box::new(left), Box::new(right))
    }

    /// `left OR right`.
    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Or(Box::new(left), Box::new(right))
    }

    /// Extracts the referenced paths and the implied time filter.
    ///
    /// Pure: the expression is not modified.
    pub fn plan(&self) -> ExpressionPlan {
        match self {
            Expression::Series { path, filter } => ExpressionPlan {
                time_filter: filter.as_ref().and_then(Filter::time_component),
                paths: BTreeSet::from([path.clone()]),
            },
            Expression::Time(filter) => ExpressionPlan {
                time_filter: filter.time_component(),
                paths: BTreeSet::new(),
            },
            Expression::And(left, right) => {
                let (left, right) = (left.plan(), right.plan());
                ExpressionPlan {
                    time_filter: match (left.time_filter, right.time_filter) {
                        (Some(l), Some(r)) => Some(Filter::and(l, r)),
                        (Some(one), None) | (None, Some(one)) => Some(one),
                        (None, None) => None,
                    },
                    paths: left.paths.into_iter().chain(right.paths).collect(),
                }
            }
            Expression::Or(left, right) => {
                let (left, right) = (left.plan(), right.plan());
                ExpressionPlan {
                    time_filter: match (left.time_filter, right.time_filter) {
                        (Some(l), Some(r)) => Some(Filter::or(l, r)),
                        _ => None,
                    },
                    paths: left.paths.into_iter().chain(right.paths).collect(),
                }
            }
        }
    }

    /// Checks that the expression can be evaluated as a timestamp stream.
    ///
    /// # Errors
    ///
    /// [`BurrowError::InvalidExpression`] when the tree has no series leaf, a time
    /// leaf references values, a series leaf has an empty path, or an OR joins a bare
    /// time predicate with a series branch.
    pub fn validate(&self) -> Result<()> {
        if !self.has_series() {
            return Err(BurrowError::InvalidExpression(
                "expression references no series".into(),
            ));
        }
        self.validate_node()
    }

    fn validate_node(&self) -> Result<()> {
        match self {
            Expression::Series { path, .. } if path.is_empty() => Err(
                BurrowError::InvalidExpression("series leaf with an empty path".into()),
            ),
            Expression::Series { .. } => Ok(()),
            Expression::Time(filter) if !filter.is_time_only() => Err(
                BurrowError::InvalidExpression("time predicate references values".into()),
            ),
            Expression::Time(_) => Ok(()),
            Expression::And(left, right) => {
                left.validate_node()?;
                right.validate_node()
            }
            Expression::Or(left, right) => {
                if left.has_series() != right.has_series() {
                    return Err(BurrowError::InvalidExpression(
                        "OR of a series and a bare time predicate is unbounded".into(),
                    ));
                }
                left.validate_node()?;
                right.validate_node()
            }
        }
    }

    fn has_series(&self) -> bool {
        match self {
            Expression::Series { .. } => true,
            Expression::Time(_) => false,
            Expression::And(l, r) | Expression::Or(l, r) => l.has_series() || r.has_series(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CompareOp;

    #[test]
    fn test_plan_collects_paths_and_time_filter() {
        let expr = Expression::and(
            Expression::series_with("root.sg.d1.s1", Filter::value(CompareOp::Gt, 1.0)),
            Expression::or(
                Expression::series("root.sg.d1.s2"),
                Expression::series_with("root.sg.d1.s3", Filter::time(CompareOp::Lt, 10)),
            ),
        );
        let before = expr.clone();
        let plan = expr.plan();
        assert_eq!(expr, before);
        assert_eq!(plan.paths.len(), 3);
        assert_eq!(plan.time_filter, None);

        let gated = Expression::and(
            Expression::series("root.sg.d1.s1"),
            Expression::time(Filter::time_between(5, 9)),
        );
        assert_eq!(gated.plan().time_filter, Some(Filter::time_between(5, 9)));
    }

    #[test]
    fn test_validate_rejects_unbounded_shapes() {
        let s = Expression::series("root.sg.d1.s1");
        let t = Expression::time(Filter::time(CompareOp::Gt, 3));
        assert!(Expression::and(s.clone(), t.clone()).validate().is_ok());
        assert!(Expression::or(s.clone(), t.clone()).validate().is_err());
        assert!(t.validate().is_err());
        assert!(Expression::time(Filter::value(CompareOp::Eq, 1.0)).validate().is_err());
        assert!(Expression::and(
            s.clone(),
            Expression::time(Filter::value(CompareOp::Eq, 1.0))
        )
        .validate()
        .is_err());
        assert!(Expression::series("").validate().is_err());
    }
}
