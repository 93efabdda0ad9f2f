//! # Join Path Enumeration
//!
//! `add_paths_to_joinrel` generates every candidate path for joining one pair of
//! input relations and hands them to a [`PathCollector`]. It is called once per
//! (outer, inner) ordering; the caller is expected to call it again with the sides
//! swapped.
//!
//! ## Strategies
//!
//! | Step | Function | Produces |
//! |------|----------|----------|
//! | 1 | [`mergejoin::sort_inner_and_outer`] | merge joins over explicitly sorted cheapest inputs |
//! | 2 | [`mergejoin::match_unsorted_outer`] | nestloops for every outer path, merge joins on presorted outers |
//! | 3 | [`hashjoin::hash_inner_and_outer`] | hash joins over the cheapest inputs |
//!
//! Steps 1 and 2 are skipped when a right or full join has a join clause the merge
//! join executor cannot handle. Step 1 is also skipped for `NOT IN` anti joins.
//! Step 3 runs when hash joins are enabled, and always for full joins, for which it
//! may be the only option.
//!
//! ## Parameterization
//!
//! A join path stays parameterized if one of its inputs needs values from a relation
//! outside the join. Such a path is only worth keeping if the parameter source could
//! not have been joined to the input directly. `param_source_rels` collects the
//! relations for which that holds; see [`candidates`] for the per-candidate checks.
//!
//! ## Distribution
//!
//! Every candidate is placed by [`crate::motion::plan_join_motions`] before it is
//! built. A candidate whose placement needs a motion above a parameterized input is
//! silently dropped.

pub mod candidates;
pub mod clauses;
pub mod hashjoin;
pub mod mergejoin;
pub mod mergekeys;

use mppx_core::bitmapset::Relids;
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::error::{PlanError, PlanResult};
use mppx_core::expr::JoinType;
use mppx_core::path::Path;
use mppx_core::query::SpecialJoinInfo;
use mppx_core::relation::{JoinClause, RelOptInfo, RestrictInfo};
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-call inputs shared by all join strategies.
pub struct JoinPathExtraData<'a> {
    pub joinrel: &'a RelOptInfo,
    pub restrictlist: &'a [Arc<RestrictInfo>],
    /// Merge-joinable clauses usable for this (outer, inner) pair.
    pub mergeclause_list: Vec<JoinClause>,
    /// Clauses whose operands can drive a redistribution of either side.
    pub redistribution_clauses: Vec<JoinClause>,
    pub sjinfo: Option<&'a SpecialJoinInfo>,
    /// Relations a parameterized join path may keep depending on.
    pub param_source_rels: Relids,
}

impl JoinPathExtraData<'_> {
    pub(crate) fn sjinfo_for(&self, jointype: JoinType) -> PlanResult<&SpecialJoinInfo> {
        self.sjinfo.ok_or(PlanError::MissingSpecialJoinInfo(jointype))
    }
}

/// True if `path` needs parameter values from some relation of `rel`.
pub(crate) fn path_param_by_rel(path: &Path, rel: &RelOptInfo) -> bool {
    path.required_outer.overlap(&rel.relids)
}

/// Relations a parameterized path of `joinrel` may depend on: those that some outer
/// join, semi join or lateral reference keeps from being joined to its inputs
/// directly.
pub fn compute_param_source_rels(ctx: &PlannerContext<'_>, joinrel: &RelOptInfo) -> Relids {
    let query = ctx.query;
    let mut rels = Relids::new();
    for sj in &query.join_info_list {
        if joinrel.relids.overlap(&sj.min_righthand) && !joinrel.relids.overlap(&sj.min_lefthand) {
            rels = rels.union(&query.all_baserels.difference(&sj.min_righthand));
        }
        // Full joins constrain both sides.
        if sj.jointype == JoinType::Full
            && joinrel.relids.overlap(&sj.min_lefthand)
            && !joinrel.relids.overlap(&sj.min_righthand)
        {
            rels = rels.union(&query.all_baserels.difference(&sj.min_lefthand));
        }
    }
    rels.union(&joinrel.lateral_relids)
}

/// Generate join paths for `joinrel` with `outerrel` as the outer side.
///
/// `restrictlist` holds every clause evaluated at this join. `sjinfo` describes the
/// special join being implemented; unique-ifying join types cannot be planned
/// without it.
#[allow(clippy::too_many_arguments)]
pub fn add_paths_to_joinrel(
    ctx: &PlannerContext<'_>,
    joinrel: &RelOptInfo,
    outerrel: &RelOptInfo,
    innerrel: &RelOptInfo,
    jointype: JoinType,
    sjinfo: Option<&SpecialJoinInfo>,
    restrictlist: &[Arc<RestrictInfo>],
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    let (Some(outer_total), Some(inner_total)) = (&outerrel.cheapest_total_path, &innerrel.cheapest_total_path)
    else {
        return Err(PlanError::Internal("join input without a cheapest path".into()));
    };

    // A recursive work table must stay on the outer side.
    if inner_total.contains_worktable_scan()
        || innerrel
            .cheapest_startup_path
            .as_ref()
            .is_some_and(|p| p.contains_worktable_scan())
    {
        trace!("inner side scans the work table; no join paths");
        return Ok(());
    }
    if path_param_by_rel(outer_total, innerrel) && path_param_by_rel(inner_total, outerrel) {
        trace!("inputs are parameterized by each other; no join paths");
        return Ok(());
    }
    if matches!(jointype, JoinType::UniqueOuter | JoinType::UniqueInner) && sjinfo.is_none() {
        return Err(PlanError::MissingSpecialJoinInfo(jointype));
    }

    let (mergeclause_list, mergejoin_allowed) =
        clauses::select_mergejoin_clauses(outerrel, innerrel, restrictlist, jointype);
    let extra = JoinPathExtraData {
        joinrel,
        restrictlist,
        mergeclause_list,
        redistribution_clauses: clauses::select_redistribution_clauses(outerrel, innerrel, restrictlist, jointype),
        sjinfo,
        param_source_rels: compute_param_source_rels(ctx, joinrel),
    };
    debug!(
        "joining {:?} to {:?} as {:?}: {} merge clauses, {} redistribution clauses",
        outerrel.relids,
        innerrel.relids,
        jointype,
        extra.mergeclause_list.len(),
        extra.redistribution_clauses.len()
    );

    if mergejoin_allowed && jointype != JoinType::LasjNotIn {
        mergejoin::sort_inner_and_outer(ctx, &extra, outerrel, innerrel, jointype, collector)?;
    }
    if mergejoin_allowed {
        mergejoin::match_unsorted_outer(ctx, &extra, outerrel, innerrel, jointype, collector)?;
    }
    if ctx.config.enable_hashjoin || jointype == JoinType::Full {
        hashjoin::hash_inner_and_outer(ctx, &extra, outerrel, innerrel, jointype, collector)?;
    }
    Ok(())
}
