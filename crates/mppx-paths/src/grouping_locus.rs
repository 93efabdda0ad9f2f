//! # Grouping Locus
//!
//! Before aggregating, every row of a group has to sit on one segment. This module
//! answers two questions for an input path and a grouping clause: is the input
//! already placed that way, and if not, where should it go?
//!
//! ## Decision
//!
//! 1. A bottleneck input (`Entry`, `SingleQE`) never needs a motion.
//! 2. With grouping sets, only the columns common to the last (smallest) set of every
//!    rollup are usable: rows of any grouping set agree on those. Without grouping
//!    sets, every GROUP BY column is usable.
//! 3. If the input is hashed on a subset of those columns, nothing moves.
//! 4. Otherwise the target is a hash locus over the usable columns that can be both
//!    hashed and merge-joined. If none qualify (or there were none to begin with),
//!    the target is a single worker.

use mppx_core::bitmapset::BitmapSet;
use mppx_core::context::PlannerContext;
use mppx_core::error::{PlanError, PlanResult};
use mppx_core::expr::Expr;
use mppx_core::locus::Locus;
use mppx_core::path::Path;
use mppx_core::query::Rollup;
use mppx_core::target::{PathTarget, SortGroupClause};
use tracing::trace;

/// Where grouping must happen, and whether getting there takes a motion.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingLocus {
    /// `Null` when no motion is needed.
    pub locus: Locus,
    pub need_redistribute: bool,
}

impl GroupingLocus {
    fn in_place() -> Self {
        Self {
            locus: Locus::Null,
            need_redistribute: false,
        }
    }
}

/// Sort-group refs every rollup's smallest grouping set shares.
fn common_rollup_refs(rollups: &[Rollup]) -> Vec<u32> {
    let mut common: Option<BitmapSet> = None;
    for rollup in rollups {
        let last = rollup
            .gsets
            .last()
            .map(|set| rollup.set_refs(set))
            .unwrap_or_default();
        let refs: BitmapSet = last.into_iter().map(|r| r as usize).collect();
        common = Some(match common {
            Some(c) => c.intersect(&refs),
            None => refs,
        });
    }
    common
        .map(|c| c.members().map(|m| m as u32).collect())
        .unwrap_or_default()
}

pub fn choose_grouping_locus(
    ctx: &PlannerContext<'_>,
    path: &Path,
    target: &PathTarget,
    group_clause: &[SortGroupClause],
    rollups: &[Rollup],
) -> PlanResult<GroupingLocus> {
    if path.locus.is_bottleneck() {
        return Ok(GroupingLocus::in_place());
    }

    let refs: Vec<u32> = if rollups.is_empty() {
        group_clause.iter().map(|c| c.tle_sort_group_ref).collect()
    } else {
        common_rollup_refs(rollups)
    };
    let group_exprs = refs
        .iter()
        .map(|r| target.expr_for_ref(*r).cloned().ok_or(PlanError::MissingSortGroupRef(*r)))
        .collect::<PlanResult<Vec<Expr>>>()?;

    if !group_exprs.is_empty() && path.locus.is_hashed_on_exprs(&group_exprs) {
        return Ok(GroupingLocus::in_place());
    }

    let numsegments = ctx.config.segment_count;
    let hash_exprs: Vec<Expr> = group_exprs
        .into_iter()
        .filter(|e| {
            let ty = e.data_type();
            ty.distribution_opfamily().is_some() && ty.has_mergejoinable_eq()
        })
        .collect();
    let locus = Locus::from_exprs(&hash_exprs, numsegments).unwrap_or_else(|| Locus::single_qe(numsegments));
    trace!("grouping needs a motion to {:?}", locus);
    Ok(GroupingLocus {
        locus,
        need_redistribute: true,
    })
}
