//! # Target Lists and Sort-Group References
//!
//! Grouping and sorting clauses never carry expressions themselves. A
//! `SortGroupClause` holds a small integer, the sort-group ref, that points at the
//! target entry (or `PathTarget` column) carrying the same ref. Two clauses are about
//! "the same expression" exactly when their refs match.
//!
//! Planning adds columns to copies of targets (DISTINCT arguments that the projection
//! did not carry, the synthetic grouping-set id, the tuple-split shape id). Each added
//! column that has to be grouped on gets a fresh ref one past the current maximum.

use crate::error::{PlanError, PlanResult};
use crate::expr::Expr;
use serde::{Deserialize, Serialize};

/// One output column of a query-level target list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetEntry {
    pub expr: Expr,
    pub resno: u32,
    /// Sort-group ref, 0 when no clause references this entry.
    pub ressortgroupref: u32,
    pub resjunk: bool,
}

impl TargetEntry {
    pub fn new(expr: Expr, resno: u32) -> Self {
        Self {
            expr,
            resno,
            ressortgroupref: 0,
            resjunk: false,
        }
    }

    pub fn with_ref(mut self, sortgroupref: u32) -> Self {
        self.ressortgroupref = sortgroupref;
        self
    }
}

/// Grouping, DISTINCT or ordering key, keyed by sort-group ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortGroupClause {
    pub tle_sort_group_ref: u32,
    pub descending: bool,
    pub nulls_first: bool,
    /// The equality operator can drive a hash table.
    pub hashable: bool,
    /// The type has a btree ordering, so the key can be sorted on.
    pub sortable: bool,
}

impl SortGroupClause {
    /// Ascending clause whose capabilities follow the expression's type.
    pub fn for_expr(sortgroupref: u32, expr: &Expr) -> Self {
        let ty = expr.data_type();
        Self {
            tle_sort_group_ref: sortgroupref,
            descending: false,
            nulls_first: false,
            hashable: ty.has_hashable_eq(),
            sortable: ty.has_mergejoinable_eq(),
        }
    }
}

/// Columns produced by a path, with their sort-group refs and an average row width.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathTarget {
    pub exprs: Vec<Expr>,
    /// Parallel to `exprs`; 0 marks an unreferenced column.
    pub sortgrouprefs: Vec<u32>,
    pub width: u32,
}

impl PathTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tlist(tlist: &[TargetEntry]) -> Self {
        let mut target = Self::new();
        for tle in tlist {
            target.add_column(tle.expr.clone(), tle.ressortgroupref);
        }
        target
    }

    pub fn add_column(&mut self, expr: Expr, sortgroupref: u32) {
        self.width += expr.data_type().typical_width();
        self.exprs.push(expr);
        self.sortgrouprefs.push(sortgroupref);
    }

    pub fn position_of(&self, expr: &Expr) -> Option<usize> {
        self.exprs.iter().position(|e| e == expr)
    }

    pub fn max_sortgroupref(&self) -> u32 {
        self.sortgrouprefs.iter().copied().max().unwrap_or(0)
    }

    pub fn expr_for_ref(&self, sortgroupref: u32) -> Option<&Expr> {
        if sortgroupref == 0 {
            return None;
        }
        self.sortgrouprefs
            .iter()
            .position(|r| *r == sortgroupref)
            .map(|i| &self.exprs[i])
    }

    /// Expressions for a clause list, in clause order.
    pub fn clause_exprs(&self, clauses: &[SortGroupClause]) -> PlanResult<Vec<Expr>> {
        clauses
            .iter()
            .map(|c| {
                self.expr_for_ref(c.tle_sort_group_ref)
                    .cloned()
                    .ok_or(PlanError::MissingSortGroupRef(c.tle_sort_group_ref))
            })
            .collect()
    }

    pub fn contains_grouping_set_id(&self) -> bool {
        self.exprs.iter().any(|e| matches!(e, Expr::GroupingSetId))
    }
}

pub fn get_sortgroupref_tle(sortgroupref: u32, tlist: &[TargetEntry]) -> PlanResult<&TargetEntry> {
    tlist
        .iter()
        .find(|tle| tle.ressortgroupref == sortgroupref)
        .ok_or(PlanError::MissingSortGroupRef(sortgroupref))
}

pub fn max_sortgroupref_in_tlist(tlist: &[TargetEntry]) -> u32 {
    tlist.iter().map(|tle| tle.ressortgroupref).max().unwrap_or(0)
}

/// Append a grouping-set id column to `tlist` and return its new sort-group ref.
///
/// Fails if the list already carries one: partial rows from different grouping sets
/// would otherwise be keyed on two competing ids.
pub fn add_gsetid_tlist(tlist: &mut Vec<TargetEntry>) -> PlanResult<u32> {
    if tlist.iter().any(|tle| matches!(tle.expr, Expr::GroupingSetId)) {
        return Err(PlanError::GroupingSetIdExists);
    }
    let sortgroupref = max_sortgroupref_in_tlist(tlist) + 1;
    let resno = tlist.len() as u32 + 1;
    tlist.push(TargetEntry::new(Expr::GroupingSetId, resno).with_ref(sortgroupref));
    Ok(sortgroupref)
}

/// Group clause with the grouping-set id as its leading key.
pub fn add_gsetid_groupclause(group_clause: &[SortGroupClause], gsetid_ref: u32) -> Vec<SortGroupClause> {
    let mut clauses = Vec::with_capacity(group_clause.len() + 1);
    clauses.push(SortGroupClause::for_expr(gsetid_ref, &Expr::GroupingSetId));
    clauses.extend_from_slice(group_clause);
    clauses
}

/// Copy of `target` whose aggregates no longer de-duplicate their input.
pub fn strip_aggdistinct(target: &PathTarget) -> PathTarget {
    let mut stripped = target.clone();
    for expr in &mut stripped.exprs {
        expr.map_aggrefs(&mut |agg| agg.distinct.clear());
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Aggref, DataType};

    fn tlist() -> Vec<TargetEntry> {
        vec![
            TargetEntry::new(Expr::column(1, "c1", 1, DataType::Int4), 1).with_ref(1),
            TargetEntry::new(Expr::column(1, "c2", 2, DataType::Text), 2).with_ref(2),
        ]
    }

    #[test]
    fn test_gsetid_added_once() {
        let mut tl = tlist();
        let gref = add_gsetid_tlist(&mut tl).unwrap();
        assert_eq!(gref, 3);
        assert_eq!(tl.len(), 3);
        assert!(matches!(tl[2].expr, Expr::GroupingSetId));

        let err = add_gsetid_tlist(&mut tl).unwrap_err();
        assert_eq!(err, PlanError::GroupingSetIdExists);
        assert_eq!(tl.len(), 3);
    }

    #[test]
    fn test_gsetid_groupclause_is_first() {
        let tl = tlist();
        let clauses: Vec<_> = tl.iter().map(|t| SortGroupClause::for_expr(t.ressortgroupref, &t.expr)).collect();
        let with_id = add_gsetid_groupclause(&clauses, 9);
        assert_eq!(with_id.len(), 3);
        assert_eq!(with_id[0].tle_sort_group_ref, 9);
        assert!(with_id[0].hashable);
        assert_eq!(&with_id[1..], &clauses[..]);
    }

    #[test]
    fn test_clause_exprs_missing_ref() {
        let target = PathTarget::from_tlist(&tlist());
        let ok = target
            .clause_exprs(&[SortGroupClause::for_expr(2, &Expr::column(1, "c2", 2, DataType::Text))])
            .unwrap();
        assert_eq!(ok.len(), 1);

        let missing = SortGroupClause::for_expr(5, &Expr::column(1, "c9", 9, DataType::Int4));
        assert_eq!(
            target.clause_exprs(&[missing]).unwrap_err(),
            PlanError::MissingSortGroupRef(5)
        );
    }

    #[test]
    fn test_strip_aggdistinct() {
        let mut target = PathTarget::new();
        target.add_column(
            Expr::Aggref(Box::new(Aggref::distinct(
                "count",
                vec![Expr::column(1, "b", 2, DataType::Int4)],
                DataType::Int8,
            ))),
            0,
        );
        let stripped = strip_aggdistinct(&target);
        assert!(!stripped.exprs[0].collect_aggrefs()[0].is_distinct());
        assert!(target.exprs[0].collect_aggrefs()[0].is_distinct());
        assert_eq!(stripped.width, target.width);
    }
}
