//! # Path Keys
//!
//! A path's sort order is an ordered list of `PathKey`s. Keys are expression based:
//! two keys are the same key when their expressions, direction and null ordering are
//! structurally equal.

use crate::error::PlanResult;
use crate::expr::Expr;
use crate::target::{PathTarget, SortGroupClause};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathKey {
    pub expr: Expr,
    pub descending: bool,
    pub nulls_first: bool,
}

impl PathKey {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            descending: false,
            nulls_first: false,
        }
    }
}

/// True if `keys1` is a prefix of `keys2`, i.e. anything sorted by `keys2` is also
/// sorted by `keys1`.
pub fn pathkeys_contained_in(keys1: &[PathKey], keys2: &[PathKey]) -> bool {
    keys1.len() <= keys2.len() && keys1.iter().zip(keys2).all(|(a, b)| a == b)
}

/// Sort order implied by a grouping or ordering clause list. Redundant keys (an
/// expression already sorted on earlier in the list) are dropped.
pub fn make_pathkeys_for_sortclauses(clauses: &[SortGroupClause], target: &PathTarget) -> PlanResult<Vec<PathKey>> {
    let exprs = target.clause_exprs(clauses)?;
    let mut keys: Vec<PathKey> = Vec::with_capacity(clauses.len());
    for (clause, expr) in clauses.iter().zip(exprs) {
        if keys.iter().any(|k| k.expr == expr) {
            continue;
        }
        keys.push(PathKey {
            expr,
            descending: clause.descending,
            nulls_first: clause.nulls_first,
        });
    }
    Ok(keys)
}
