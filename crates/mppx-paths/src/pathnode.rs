//! # Path Constructors
//!
//! Every planner here builds new paths by wrapping existing ones. The constructors
//! in this module take the child by `Arc`, ask the cost model for the new node's cost,
//! and derive rows, sort order and locus from the child. They never modify the child.
//!
//! Motions are built in [`crate::motion`], since choosing where rows go needs locus
//! reasoning that plain wrappers do not.

use crate::motion::create_motion_path;
use mppx_core::context::PlannerContext;
use mppx_core::cost::AggClauseCosts;
use mppx_core::expr::Expr;
use mppx_core::locus::Locus;
use mppx_core::path::{AggSplit, AggStrategy, DqaExpr, Path, PathKind};
use mppx_core::pathkeys::PathKey;
use mppx_core::query::{Rollup, SpecialJoinInfo};
use mppx_core::target::{PathTarget, SortGroupClause};
use std::sync::Arc;

/// Round a row estimate to a whole number of at least one row.
pub fn clamp_row_est(rows: f64) -> f64 {
    if rows.is_nan() || rows <= 1.0 {
        1.0
    } else {
        rows.round()
    }
}

pub fn create_sort_path(ctx: &PlannerContext<'_>, subpath: Arc<Path>, pathkeys: Vec<PathKey>) -> Arc<Path> {
    let cost = ctx.cost_model.cost_sort(&subpath, &pathkeys);
    Arc::new(Path {
        parent: subpath.parent.clone(),
        locus: subpath.locus.clone(),
        rows: subpath.rows,
        startup_cost: cost.startup,
        total_cost: cost.total,
        pathkeys,
        target: Arc::clone(&subpath.target),
        required_outer: subpath.required_outer.clone(),
        kind: PathKind::Sort { subpath },
    })
}

pub fn create_material_path(ctx: &PlannerContext<'_>, subpath: Arc<Path>) -> Arc<Path> {
    let cost = ctx.cost_model.cost_material(&subpath);
    Arc::new(Path {
        parent: subpath.parent.clone(),
        locus: subpath.locus.clone(),
        rows: subpath.rows,
        startup_cost: cost.startup,
        total_cost: cost.total,
        pathkeys: subpath.pathkeys.clone(),
        target: Arc::clone(&subpath.target),
        required_outer: subpath.required_outer.clone(),
        kind: PathKind::Material { subpath },
    })
}

/// Make `subpath` emit `target`. A path that already emits it is returned as is.
pub fn apply_projection_to_path(ctx: &PlannerContext<'_>, subpath: Arc<Path>, target: Arc<PathTarget>) -> Arc<Path> {
    if *subpath.target == *target {
        return subpath;
    }
    let cost = ctx.cost_model.cost_projection(&subpath);
    Arc::new(Path {
        parent: subpath.parent.clone(),
        locus: subpath.locus.clone(),
        rows: subpath.rows,
        startup_cost: cost.startup,
        total_cost: cost.total,
        pathkeys: subpath.pathkeys.clone(),
        target,
        required_outer: subpath.required_outer.clone(),
        kind: PathKind::Projection { subpath },
    })
}

/// Parameters of one aggregation node.
#[derive(Debug, Clone)]
pub struct AggSpec<'c> {
    pub strategy: AggStrategy,
    pub split: AggSplit,
    pub streaming: bool,
    pub group_clause: Vec<SortGroupClause>,
    pub qual: Option<Expr>,
    pub agg_costs: &'c AggClauseCosts,
    /// Estimated output rows per segment (or in total for a bottleneck input).
    pub num_groups: f64,
    /// Grouping width to cost with, when it differs from `group_clause.len()`.
    pub costing_group_cols: Option<usize>,
}

impl<'c> AggSpec<'c> {
    pub fn new(
        strategy: AggStrategy,
        split: AggSplit,
        group_clause: Vec<SortGroupClause>,
        agg_costs: &'c AggClauseCosts,
        num_groups: f64,
    ) -> Self {
        Self {
            strategy,
            split,
            streaming: false,
            group_clause,
            qual: None,
            agg_costs,
            num_groups,
            costing_group_cols: None,
        }
    }

    pub fn with_qual(mut self, qual: Option<Expr>) -> Self {
        self.qual = qual;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn costed_as(mut self, group_cols: usize) -> Self {
        self.costing_group_cols = Some(group_cols);
        self
    }
}

pub fn create_agg_path(
    ctx: &PlannerContext<'_>,
    subpath: Arc<Path>,
    target: Arc<PathTarget>,
    spec: AggSpec<'_>,
) -> Arc<Path> {
    let num_groups = clamp_row_est(spec.num_groups);
    let cost = ctx.cost_model.cost_agg(
        spec.strategy,
        spec.split,
        spec.agg_costs,
        spec.costing_group_cols.unwrap_or(spec.group_clause.len()),
        num_groups,
        &subpath,
        target.width,
    );
    // Sorted grouping emits groups in input order; the other strategies do not.
    let pathkeys = match spec.strategy {
        AggStrategy::Sorted if !spec.group_clause.is_empty() => subpath.pathkeys.clone(),
        _ => Vec::new(),
    };
    Arc::new(Path {
        parent: subpath.parent.clone(),
        locus: subpath.locus.clone(),
        rows: num_groups,
        startup_cost: cost.startup,
        total_cost: cost.total,
        pathkeys,
        target,
        required_outer: subpath.required_outer.clone(),
        kind: PathKind::Agg {
            subpath,
            strategy: spec.strategy,
            split: spec.split,
            streaming: spec.streaming,
            group_clause: spec.group_clause,
            qual: spec.qual,
            num_groups,
        },
    })
}

/// Partial grouping-sets aggregation over sorted input.
pub fn create_groupingsets_path(
    ctx: &PlannerContext<'_>,
    subpath: Arc<Path>,
    target: Arc<PathTarget>,
    rollups: Vec<Rollup>,
    split: AggSplit,
    agg_costs: &AggClauseCosts,
    num_groups: f64,
) -> Arc<Path> {
    let num_groups = clamp_row_est(num_groups);
    let num_group_cols = rollups.iter().map(|r| r.group_clause.len()).max().unwrap_or(0);
    let passes = rollups.iter().map(|r| r.gsets.len()).sum::<usize>().max(1);
    let mut cost = ctx.cost_model.cost_agg(
        AggStrategy::Sorted,
        split,
        agg_costs,
        num_group_cols,
        num_groups,
        &subpath,
        target.width,
    );
    // One sorted pass per grouping set, over the same input.
    let per_pass = cost.total - subpath.total_cost;
    cost.total = subpath.total_cost + per_pass * passes as f64;
    Arc::new(Path {
        parent: subpath.parent.clone(),
        locus: subpath.locus.clone(),
        rows: num_groups,
        startup_cost: cost.startup,
        total_cost: cost.total,
        pathkeys: Vec::new(),
        target,
        required_outer: subpath.required_outer.clone(),
        kind: PathKind::GroupingSets {
            subpath,
            rollups,
            split,
            num_groups,
        },
    })
}

/// Fan each input row out once per DISTINCT shape.
pub fn create_tuple_split_path(
    ctx: &PlannerContext<'_>,
    subpath: Arc<Path>,
    target: Arc<PathTarget>,
    group_clause: Vec<SortGroupClause>,
    dqa_exprs: Vec<DqaExpr>,
) -> Arc<Path> {
    let fanout = dqa_exprs.len().max(1);
    let cost = ctx.cost_model.cost_tuple_split(&subpath, fanout);
    Arc::new(Path {
        parent: subpath.parent.clone(),
        locus: subpath.locus.clone(),
        rows: subpath.rows * fanout as f64,
        startup_cost: cost.startup,
        total_cost: cost.total,
        pathkeys: Vec::new(),
        target,
        required_outer: subpath.required_outer.clone(),
        kind: PathKind::TupleSplit {
            subpath,
            group_clause,
            dqa_exprs,
        },
    })
}

/// De-duplicate `subpath` on the semi join's right-hand expressions, so that a semi
/// join can run as an inner join. Rows are first brought together by those
/// expressions when the locus does not already guarantee it.
///
/// Returns `None` when there is nothing to unique-ify on, or when the needed motion
/// would sit above a parameterized path.
pub fn create_unique_path(ctx: &PlannerContext<'_>, subpath: Arc<Path>, sjinfo: &SpecialJoinInfo) -> Option<Arc<Path>> {
    let exprs = &sjinfo.semi_rhs_exprs;
    if exprs.is_empty() {
        return None;
    }

    let mut path = subpath;
    if path.locus.is_partitioned() && !path.locus.is_hashed_on_exprs(exprs) {
        let numsegments = ctx.config.segment_count;
        let locus = Locus::from_exprs(exprs, numsegments).unwrap_or_else(|| Locus::single_qe(numsegments));
        path = create_motion_path(ctx, path, Vec::new(), locus)?;
    }

    let hashed = sjinfo.semi_can_hash;
    let num_groups = clamp_row_est(ctx.estimator.estimate_num_groups(exprs, path.rows));
    let cost = ctx.cost_model.cost_unique(&path, num_groups, hashed);
    let pathkeys = if hashed {
        Vec::new()
    } else {
        exprs.iter().cloned().map(PathKey::asc).collect()
    };
    Some(Arc::new(Path {
        parent: path.parent.clone(),
        locus: path.locus.clone(),
        rows: num_groups.min(path.rows.max(1.0)),
        startup_cost: cost.startup,
        total_cost: cost.total,
        pathkeys,
        target: Arc::clone(&path.target),
        required_outer: path.required_outer.clone(),
        kind: PathKind::Unique {
            exprs: exprs.clone(),
            hashed,
            subpath: path,
        },
    }))
}
