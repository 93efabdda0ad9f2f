//! # Planner Errors
//!
//! Path generation has exactly two outcomes for a strategy: it submits zero or more
//! candidates, or it detects a broken precondition. The first is ordinary control flow
//! (`Ok(())`). Only the second is a `PlanError`, and it aborts planning of the current
//! query.
//!
//! Callers never see a `PlanError` for degenerate but valid input such as an empty
//! GROUP BY, a grouping clause over unhashable types, or a join without usable
//! equality clauses. Those narrow the candidate set instead.

use crate::expr::JoinType;

/// Fatal internal planner error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    /// The target list already carries a grouping-set id column.
    #[error("GROUPINGSET_ID already exists in target list")]
    GroupingSetIdExists,

    /// A unique-ifying or semi join type arrived without the special-join info that
    /// names the columns to unique-ify on.
    #[error("join type {0:?} requires special join info")]
    MissingSpecialJoinInfo(JoinType),

    /// A grouping clause references a sort-group ref that is absent from the target.
    #[error("sort-group ref {0} not found in target list")]
    MissingSortGroupRef(u32),

    #[error("internal planner error: {0}")]
    Internal(String),
}

pub type PlanResult<T> = Result<T, PlanError>;
