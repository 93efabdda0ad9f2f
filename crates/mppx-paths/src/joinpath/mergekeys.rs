//! Sort-order bookkeeping for merge joins: which outer orderings to try, which
//! merge clauses a given outer order can drive, and the inner order those clauses
//! then demand.

use mppx_core::bitmapset::Relids;
use mppx_core::expr::{Expr, JoinType};
use mppx_core::path::Path;
use mppx_core::pathkeys::PathKey;
use mppx_core::relation::JoinClause;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostCriterion {
    Startup,
    Total,
}

pub fn compare_path_costs(a: &Path, b: &Path, criterion: CostCriterion) -> Ordering {
    match criterion {
        CostCriterion::Startup => a
            .startup_cost
            .total_cmp(&b.startup_cost)
            .then(a.total_cost.total_cmp(&b.total_cost)),
        CostCriterion::Total => a
            .total_cost
            .total_cmp(&b.total_cost)
            .then(a.startup_cost.total_cmp(&b.startup_cost)),
    }
}

/// Cheapest path already sorted on `pathkeys` whose parameterization is covered by
/// `required_outer`.
pub fn get_cheapest_path_for_pathkeys(
    paths: &[Arc<Path>],
    pathkeys: &[PathKey],
    required_outer: &Relids,
    criterion: CostCriterion,
) -> Option<Arc<Path>> {
    paths
        .iter()
        .filter(|p| p.is_sorted_on(pathkeys) && p.required_outer.is_subset(required_outer))
        .min_by(|a, b| compare_path_costs(a, b, criterion))
        .cloned()
}

/// Canonical outer sort keys for a set of merge clauses: one ascending key per
/// distinct outer operand, in clause order.
pub fn select_outer_pathkeys_for_merge(mergeclauses: &[JoinClause]) -> Vec<PathKey> {
    let mut keys: Vec<PathKey> = Vec::new();
    for clause in mergeclauses {
        let Some(expr) = clause.outer_expr() else {
            continue;
        };
        if !keys.iter().any(|k| k.expr == *expr) {
            keys.push(PathKey::asc(expr.clone()));
        }
    }
    keys
}

/// The merge clauses an outer path sorted on `pathkeys` can drive, in key order.
/// Stops at the first key no clause uses, since later keys are only ordered within
/// groups of that one.
pub fn find_mergeclauses_for_outer_pathkeys(pathkeys: &[PathKey], mergeclauses: &[JoinClause]) -> Vec<JoinClause> {
    let mut result = Vec::new();
    for key in pathkeys {
        let matched: Vec<&JoinClause> = mergeclauses
            .iter()
            .filter(|c| c.outer_expr() == Some(&key.expr) && !result.contains(*c))
            .collect();
        if matched.is_empty() {
            break;
        }
        result.extend(matched.into_iter().cloned());
    }
    result
}

/// Inner sort keys matching `mergeclauses`, each in the direction of the outer key
/// its clause pairs with.
pub fn make_inner_pathkeys_for_merge(mergeclauses: &[JoinClause], outer_pathkeys: &[PathKey]) -> Vec<PathKey> {
    let mut keys: Vec<PathKey> = Vec::new();
    for clause in mergeclauses {
        let (Some(outer), Some(inner)) = (clause.outer_expr(), clause.inner_expr()) else {
            continue;
        };
        if keys.iter().any(|k| k.expr == *inner) {
            continue;
        }
        let template = outer_pathkeys.iter().find(|k| k.expr == *outer);
        keys.push(PathKey {
            expr: inner.clone(),
            descending: template.is_some_and(|k| k.descending),
            nulls_first: template.is_some_and(|k| k.nulls_first),
        });
    }
    keys
}

/// Longest prefix of `mergeclauses` whose inner operands follow `pathkeys`.
pub fn trim_mergeclauses_for_inner_pathkeys(mergeclauses: &[JoinClause], pathkeys: &[PathKey]) -> Vec<JoinClause> {
    let mut keys = pathkeys.iter();
    let Some(mut current) = keys.next() else {
        return Vec::new();
    };
    let mut matched_current = false;
    let mut result = Vec::new();

    for clause in mergeclauses {
        let inner: Option<&Expr> = clause.inner_expr();
        if inner != Some(&current.expr) {
            if !matched_current {
                break;
            }
            match keys.next() {
                Some(next) if inner == Some(&next.expr) => current = next,
                _ => break,
            }
        }
        matched_current = true;
        result.push(clause.clone());
    }
    result
}

/// Sort order of a join's output given its outer input's order. Right and full
/// joins emit null-extended rows out of order.
pub fn build_join_pathkeys(jointype: JoinType, outer_pathkeys: &[PathKey]) -> Vec<PathKey> {
    match jointype {
        JoinType::Right | JoinType::Full => Vec::new(),
        _ => outer_pathkeys.to_vec(),
    }
}
