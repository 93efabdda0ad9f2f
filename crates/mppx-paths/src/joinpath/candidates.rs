//! # Join Candidates
//!
//! Each `try_*_path` function checks one (outer path, inner path) pairing in three
//! steps, cheapest first:
//!
//! 1. **Parameterization.** Work out which outside relations the join would still
//!    need parameters from, and reject the pairing if keeping that dependency is
//!    pointless (see below).
//! 2. **Precheck.** Ask the cost model for a lower bound and let the collector say
//!    whether a path that cheap, with this sort order and parameterization, could
//!    survive at all.
//! 3. **Build.** Place the join with [`plan_join_motions`], re-cost it on the moved
//!    inputs and submit it.
//!
//! ## Parameterization Rules
//!
//! A nestloop can satisfy its inner side's parameters from its own outer side, so
//! only what neither side supplies remains required. Merge and hash joins supply
//! nothing; they inherit both sides' requirements.
//!
//! A parameterized result is kept only if its requirement overlaps
//! `param_source_rels`. Nestloops have one exception, the star-schema case: the
//! outer side supplies some but not all of the inner side's parameters, which lets
//! several small tables feed one parameterized scan of a large one through stacked
//! nestloops.
//!
//! A nestloop is also rejected when passing the inner side's parameters down would
//! require evaluating a placeholder expression below the join level it belongs to.

use super::JoinPathExtraData;
use crate::motion::plan_join_motions;
use crate::pathnode::{clamp_row_est, create_material_path};
use mppx_core::bitmapset::Relids;
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::cost::Cost;
use mppx_core::expr::JoinType;
use mppx_core::locus::Locus;
use mppx_core::path::{JoinPathData, Path, PathKind};
use mppx_core::pathkeys::PathKey;
use mppx_core::query::PlannerQuery;
use mppx_core::relation::JoinClause;
use mppx_core::target::PathTarget;
use std::sync::Arc;
use tracing::trace;

/// Join types as seen by the strategy (`jointype`, after unique-ification and
/// dedup rewriting) and as requested by the caller (`orig`).
#[derive(Debug, Clone, Copy)]
pub struct JoinTypes {
    pub orig: JoinType,
    pub jointype: JoinType,
}

impl JoinTypes {
    /// Join type recorded on the built path. Dedup joins keep their identity so the
    /// de-duplication step above them is not lost.
    fn recorded(self) -> JoinType {
        match self.orig {
            JoinType::DedupSemi | JoinType::DedupSemiReverse => self.orig,
            _ => self.jointype,
        }
    }
}

pub fn calc_nestloop_required_outer(outer: &Path, inner: &Path) -> Relids {
    outer
        .required_outer
        .union(&inner.required_outer)
        .difference(&outer.parent)
}

pub fn calc_non_nestloop_required_outer(outer: &Path, inner: &Path) -> Relids {
    outer.required_outer.union(&inner.required_outer)
}

/// The outer side supplies some, but not all, of the inner side's parameters.
pub fn allow_star_schema_join(outer: &Path, inner: &Path) -> bool {
    inner.required_outer.overlap(&outer.parent) && inner.required_outer.nonempty_difference(&outer.parent)
}

/// True if some placeholder that the inner side could receive as a parameter would
/// have to be computed partly from the outer side's relations, i.e. below the level
/// where it can be evaluated.
pub fn have_dangerous_phv(query: &PlannerQuery, outer_relids: &Relids, inner_params: &Relids) -> bool {
    query.placeholders.iter().any(|ph| {
        ph.ph_eval_at.is_subset(inner_params)
            && ph.ph_eval_at.overlap(outer_relids)
            && !ph.ph_eval_at.is_subset(outer_relids)
    })
}

fn join_rows(extra: &JoinPathExtraData<'_>, locus: &Locus) -> f64 {
    let total = extra.joinrel.rows;
    if locus.is_partitioned() {
        clamp_row_est(total / locus.num_segments().max(1) as f64)
    } else {
        clamp_row_est(total)
    }
}

struct JoinShape {
    locus: Locus,
    initial: Cost,
    pathkeys: Vec<PathKey>,
    required_outer: Relids,
}

/// Output columns of a join: the outer side's followed by the inner side's.
fn join_target(outer: &Path, inner: &Path) -> Arc<PathTarget> {
    let mut target = (*outer.target).clone();
    for (expr, sortgroupref) in inner.target.exprs.iter().zip(&inner.target.sortgrouprefs) {
        target.add_column(expr.clone(), *sortgroupref);
    }
    Arc::new(target)
}

fn finish_join(ctx: &PlannerContext<'_>, extra: &JoinPathExtraData<'_>, shape: JoinShape, kind: PathKind) -> Arc<Path> {
    let rows = join_rows(extra, &shape.locus);
    let cost = ctx.cost_model.final_cost_join(shape.initial, rows);
    let target = match &kind {
        PathKind::NestLoop(join) | PathKind::MergeJoin { join, .. } | PathKind::HashJoin { join, .. } => {
            join_target(&join.outer, &join.inner)
        }
        _ => Arc::new(PathTarget::new()),
    };
    Arc::new(Path {
        kind,
        parent: extra.joinrel.relids.clone(),
        locus: shape.locus,
        rows,
        startup_cost: cost.startup,
        total_cost: cost.total,
        pathkeys: shape.pathkeys,
        target,
        required_outer: shape.required_outer,
    })
}

fn join_data(extra: &JoinPathExtraData<'_>, types: JoinTypes, outer: Arc<Path>, inner: Arc<Path>) -> JoinPathData {
    JoinPathData {
        jointype: types.recorded(),
        outer,
        inner,
        joinrestrictinfo: extra.restrictlist.to_vec(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn try_nestloop_path(
    ctx: &PlannerContext<'_>,
    extra: &JoinPathExtraData<'_>,
    types: JoinTypes,
    outer: &Arc<Path>,
    inner: &Arc<Path>,
    pathkeys: &[PathKey],
    collector: &mut dyn PathCollector,
) {
    let required_outer = calc_nestloop_required_outer(outer, inner);
    if !required_outer.is_empty()
        && ((!required_outer.overlap(&extra.param_source_rels) && !allow_star_schema_join(outer, inner))
            || have_dangerous_phv(ctx.query, &outer.parent, &inner.required_outer))
    {
        trace!("nestloop rejected: parameterized by {:?}", required_outer);
        return;
    }

    let initial = ctx.cost_model.initial_cost_nestloop(types.jointype, outer, inner);
    if !collector.add_path_precheck(initial.startup, initial.total, pathkeys, &required_outer) {
        return;
    }

    let Some(motions) = plan_join_motions(ctx, types.orig, outer, inner, &extra.redistribution_clauses) else {
        trace!("nestloop rejected: no placement for parameterized input");
        return;
    };
    // A nestloop rescans its inner side; a motion cannot be rescanned.
    let inner_moved = motions.inner_moved(inner);
    let outer_moved = motions.outer_moved(outer);
    let moved_inner = if inner_moved && !motions.inner.materializes_output() {
        create_material_path(ctx, motions.inner)
    } else {
        motions.inner
    };
    let shape = JoinShape {
        initial: ctx.cost_model.initial_cost_nestloop(types.jointype, &motions.outer, &moved_inner),
        pathkeys: if outer_moved { Vec::new() } else { pathkeys.to_vec() },
        locus: motions.locus,
        required_outer,
    };
    let kind = PathKind::NestLoop(join_data(extra, types, motions.outer, moved_inner));
    collector.add_path(finish_join(ctx, extra, shape, kind));
}

#[allow(clippy::too_many_arguments)]
pub fn try_mergejoin_path(
    ctx: &PlannerContext<'_>,
    extra: &JoinPathExtraData<'_>,
    types: JoinTypes,
    outer: &Arc<Path>,
    inner: &Arc<Path>,
    pathkeys: &[PathKey],
    mergeclauses: &[JoinClause],
    outersortkeys: &[PathKey],
    innersortkeys: &[PathKey],
    collector: &mut dyn PathCollector,
) {
    let required_outer = calc_non_nestloop_required_outer(outer, inner);
    if !required_outer.is_empty() && !required_outer.overlap(&extra.param_source_rels) {
        trace!("mergejoin rejected: parameterized by {:?}", required_outer);
        return;
    }

    // Inputs already in the right order need no explicit sort.
    let outersortkeys = if outer.is_sorted_on(outersortkeys) { &[][..] } else { outersortkeys };
    let innersortkeys = if inner.is_sorted_on(innersortkeys) { &[][..] } else { innersortkeys };

    let initial = ctx.cost_model.initial_cost_mergejoin(
        types.jointype,
        mergeclauses.len(),
        outer,
        inner,
        outersortkeys,
        innersortkeys,
    );
    if !collector.add_path_precheck(initial.startup, initial.total, pathkeys, &required_outer) {
        return;
    }

    let Some(motions) = plan_join_motions(ctx, types.orig, outer, inner, &extra.redistribution_clauses) else {
        trace!("mergejoin rejected: no placement for parameterized input");
        return;
    };
    // A motion loses the input order; re-sort on the order the merge relied on.
    let resort = |moved: bool, explicit: &[PathKey], original: &Path| -> Vec<PathKey> {
        match (moved, explicit.is_empty()) {
            (_, false) => explicit.to_vec(),
            (true, true) => original.pathkeys.clone(),
            (false, true) => Vec::new(),
        }
    };
    let outersortkeys = resort(motions.outer_moved(outer), outersortkeys, outer);
    let innersortkeys = resort(motions.inner_moved(inner), innersortkeys, inner);

    let shape = JoinShape {
        initial: ctx.cost_model.initial_cost_mergejoin(
            types.jointype,
            mergeclauses.len(),
            &motions.outer,
            &motions.inner,
            &outersortkeys,
            &innersortkeys,
        ),
        pathkeys: pathkeys.to_vec(),
        locus: motions.locus,
        required_outer,
    };
    let kind = PathKind::MergeJoin {
        join: join_data(extra, types, motions.outer, motions.inner),
        mergeclauses: mergeclauses.iter().map(|c| Arc::clone(&c.rinfo)).collect(),
        outersortkeys,
        innersortkeys,
    };
    collector.add_path(finish_join(ctx, extra, shape, kind));
}

pub fn try_hashjoin_path(
    ctx: &PlannerContext<'_>,
    extra: &JoinPathExtraData<'_>,
    types: JoinTypes,
    outer: &Arc<Path>,
    inner: &Arc<Path>,
    hashclauses: &[JoinClause],
    collector: &mut dyn PathCollector,
) {
    let required_outer = calc_non_nestloop_required_outer(outer, inner);
    if !required_outer.is_empty() && !required_outer.overlap(&extra.param_source_rels) {
        trace!("hashjoin rejected: parameterized by {:?}", required_outer);
        return;
    }

    let initial = ctx.cost_model.initial_cost_hashjoin(types.jointype, hashclauses.len(), outer, inner);
    if !collector.add_path_precheck(initial.startup, initial.total, &[], &required_outer) {
        return;
    }

    let Some(motions) = plan_join_motions(ctx, types.orig, outer, inner, &extra.redistribution_clauses) else {
        trace!("hashjoin rejected: no placement for parameterized input");
        return;
    };
    let shape = JoinShape {
        initial: ctx
            .cost_model
            .initial_cost_hashjoin(types.jointype, hashclauses.len(), &motions.outer, &motions.inner),
        pathkeys: Vec::new(),
        locus: motions.locus,
        required_outer,
    };
    let kind = PathKind::HashJoin {
        join: join_data(extra, types, motions.outer, motions.inner),
        hashclauses: hashclauses.iter().map(|c| Arc::clone(&c.rinfo)).collect(),
    };
    collector.add_path(finish_join(ctx, extra, shape, kind));
}
