//! Query evaluation: predicates, expressions, per-series readers, and the timestamp
//! generator combining them.

pub mod expression;
pub mod filter;
pub mod generator;
pub mod reader;

pub use expression::{Expression, ExpressionPlan};
pub use filter::{CompareOp, Filter};
pub use generator::{Order, TimeGenerator};
pub use reader::SeriesReader;
