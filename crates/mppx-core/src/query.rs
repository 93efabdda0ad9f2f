//! # Query Input
//!
//! `PlannerQuery` is everything path generation reads from the analyzed query: the
//! processed target list, GROUP BY and grouping sets, HAVING, and the outer-join and
//! placeholder bookkeeping that restricts which parameterized paths are legal.

use crate::bitmapset::Relids;
use crate::error::PlanResult;
use crate::expr::{Expr, JoinType};
use crate::pathkeys::{make_pathkeys_for_sortclauses, PathKey};
use crate::target::{PathTarget, SortGroupClause, TargetEntry};
use serde::{Deserialize, Serialize};

/// One rollup of a GROUPING SETS clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rollup {
    /// Grouping clause of the largest set, in rollup order.
    pub group_clause: Vec<SortGroupClause>,
    /// Grouping sets, largest first, as indexes into `group_clause`.
    pub gsets: Vec<Vec<usize>>,
}

impl Rollup {
    /// Sort-group refs of one grouping set of this rollup.
    pub fn set_refs(&self, set: &[usize]) -> Vec<u32> {
        set.iter()
            .filter_map(|i| self.group_clause.get(*i))
            .map(|c| c.tle_sort_group_ref)
            .collect()
    }
}

/// Outer join, semi join or anti join constraint on join order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialJoinInfo {
    pub jointype: JoinType,
    /// Relations that must be on the left side of this join.
    pub min_lefthand: Relids,
    pub min_righthand: Relids,
    /// Right-hand expressions compared by a semi join; the unique-ification key.
    pub semi_rhs_exprs: Vec<Expr>,
    pub semi_can_hash: bool,
}

impl SpecialJoinInfo {
    pub fn new(jointype: JoinType, min_lefthand: Relids, min_righthand: Relids) -> Self {
        Self {
            jointype,
            min_lefthand,
            min_righthand,
            semi_rhs_exprs: Vec::new(),
            semi_can_hash: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceHolderInfo {
    pub phid: u32,
    /// Lowest join level at which the placeholder can be evaluated.
    pub ph_eval_at: Relids,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerQuery {
    pub processed_tlist: Vec<TargetEntry>,
    pub group_clause: Vec<SortGroupClause>,
    /// Empty unless the query uses GROUPING SETS / ROLLUP / CUBE.
    pub grouping_sets: Vec<Rollup>,
    pub having_qual: Option<Expr>,
    pub join_info_list: Vec<SpecialJoinInfo>,
    pub all_baserels: Relids,
    pub placeholders: Vec<PlaceHolderInfo>,
}

impl PlannerQuery {
    pub fn has_grouping_sets(&self) -> bool {
        !self.grouping_sets.is_empty()
    }

    /// Sort order required by sorted grouping.
    pub fn group_pathkeys(&self) -> PlanResult<Vec<PathKey>> {
        make_pathkeys_for_sortclauses(&self.group_clause, &PathTarget::from_tlist(&self.processed_tlist))
    }
}
