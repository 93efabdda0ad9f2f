//! # DISTINCT-Qualified Aggregates
//!
//! Classification of a query's DISTINCT aggregates, and the target-list bookkeeping
//! the DISTINCT planners need before they can build anything.
//!
//! ## Shapes
//!
//! A *shape* is the set of argument columns a DISTINCT aggregate de-duplicates on,
//! together with its FILTER. `count(DISTINCT b)` and `sum(DISTINCT b)` share a shape;
//! `count(DISTINCT b)` and `count(DISTINCT c)` do not. One shape can be planned by
//! de-duplicating on `GROUP BY ∪ args` directly. Several shapes need a tuple split:
//! every input row is emitted once per shape, tagged with the shape id, so one
//! de-duplicating aggregate can serve all of them.
//!
//! ## Sort-Group Refs
//!
//! DISTINCT arguments are grouped on like any other column, so they need sort-group
//! refs in the projected input. Arguments the input does not carry are added as new
//! columns; arguments it carries without a ref get one. Fresh refs start above the
//! largest ref in use by either the input or the query's target list.

use super::GroupingInput;
use mppx_core::bitmapset::BitmapSet;
use mppx_core::context::PlannerContext;
use mppx_core::error::{PlanError, PlanResult};
use mppx_core::expr::{Aggref, Expr};
use mppx_core::path::{DqaExpr, Path};
use mppx_core::target::{get_sortgroupref_tle, max_sortgroupref_in_tlist, PathTarget, SortGroupClause};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DqaType {
    /// Not plannable by the DISTINCT strategies.
    Invalid,
    /// One shape, no plain aggregates.
    SingleDqa,
    /// One shape plus at least one plain aggregate.
    SingleDqaWithAgg,
    /// Two or more shapes.
    MultiDqa,
    /// Two or more shapes plus plain aggregates. Not planned.
    MultiDqaWithAgg,
}

/// Classify the DISTINCT aggregates of `grouping`.
///
/// Ordered aggregates and DISTINCT keys without a hashable equality make the whole
/// query `Invalid`. Otherwise every DISTINCT aggregate is compared against the first
/// one's argument list, and a plain aggregate anywhere in the output target upgrades
/// the result to its `WithAgg` variant.
pub fn recognize_dqa_type(grouping: &GroupingInput<'_>) -> DqaType {
    let mut dqa_type = DqaType::Invalid;
    let mut first: Option<&Aggref> = None;

    for agg in &grouping.agg_costs.distinct_aggrefs {
        if !agg.order_by.is_empty() {
            trace!("{} has ORDER BY; DISTINCT aggregates not planned", agg.name);
            return DqaType::Invalid;
        }
        if agg.distinct.iter().any(|c| !c.hashable) {
            trace!("{} has a DISTINCT key that cannot be hashed", agg.name);
            return DqaType::Invalid;
        }
        match first {
            None => {
                first = Some(agg);
                dqa_type = DqaType::SingleDqa;
            }
            Some(f) if !f.arg_exprs().eq(agg.arg_exprs()) => dqa_type = DqaType::MultiDqa,
            Some(_) => {}
        }
    }
    if dqa_type == DqaType::Invalid {
        return dqa_type;
    }

    let has_plain_agg = grouping
        .target
        .exprs
        .iter()
        .flat_map(|e| e.collect_aggrefs())
        .any(|agg| !agg.is_distinct());
    match (dqa_type, has_plain_agg) {
        (DqaType::SingleDqa, true) => DqaType::SingleDqaWithAgg,
        (DqaType::MultiDqa, true) => DqaType::MultiDqaWithAgg,
        (t, _) => t,
    }
}

/// The one DISTINCT shape of a `SingleDqa` or `SingleDqaWithAgg` query.
#[derive(Debug, Clone)]
pub struct SingleDqaInfo {
    /// Input target plus any DISTINCT argument it was missing, all with refs.
    pub input_proj_target: Arc<PathTarget>,
    /// `GROUP BY` followed by the DISTINCT arguments.
    pub dqa_group_clause: Vec<SortGroupClause>,
    /// Distinct `(GROUP BY, DISTINCT args)` combinations over the whole input.
    pub num_distinct_groups: f64,
}

/// Running sort-group ref allocation over a copy of the input target.
struct RefAllocator {
    target: PathTarget,
    max_ref: u32,
}

impl RefAllocator {
    fn new(ctx: &PlannerContext<'_>, path: &Path) -> Self {
        let target = (*path.target).clone();
        let max_ref = target
            .max_sortgroupref()
            .max(max_sortgroupref_in_tlist(&ctx.query.processed_tlist));
        Self { target, max_ref }
    }

    fn next_ref(&mut self) -> u32 {
        self.max_ref += 1;
        self.max_ref
    }

    /// Ref of `expr` in the target, and whether it was assigned just now.
    fn resolve(&mut self, expr: &Expr) -> (u32, bool) {
        match self.target.position_of(expr) {
            None => {
                let sortgroupref = self.next_ref();
                self.target.add_column(expr.clone(), sortgroupref);
                (sortgroupref, true)
            }
            Some(i) if self.target.sortgrouprefs[i] == 0 => {
                let sortgroupref = self.next_ref();
                self.target.sortgrouprefs[i] = sortgroupref;
                (sortgroupref, true)
            }
            Some(i) => (self.target.sortgrouprefs[i], false),
        }
    }
}

fn dedup_clause(template: &SortGroupClause, sortgroupref: u32) -> SortGroupClause {
    SortGroupClause {
        tle_sort_group_ref: sortgroupref,
        hashable: true,
        ..template.clone()
    }
}

pub fn fetch_single_dqa_info(
    ctx: &PlannerContext<'_>,
    path: &Path,
    grouping: &GroupingInput<'_>,
) -> PlanResult<SingleDqaInfo> {
    let group_clause = &ctx.query.group_clause;
    let agg = grouping
        .agg_costs
        .distinct_aggrefs
        .first()
        .ok_or_else(|| PlanError::Internal("no DISTINCT aggregate to plan".into()))?;

    let mut refs = RefAllocator::new(ctx, path);
    let mut dqa_exprs = path.target.clause_exprs(group_clause)?;
    let mut dqa_group_clause = group_clause.clone();
    for clause in &agg.distinct {
        let arg = get_sortgroupref_tle(clause.tle_sort_group_ref, &agg.args)?;
        let (sortgroupref, _) = refs.resolve(&arg.expr);
        dqa_group_clause.push(dedup_clause(clause, sortgroupref));
        dqa_exprs.push(arg.expr.clone());
    }

    let num_distinct_groups = ctx.estimator.estimate_num_groups(&dqa_exprs, path.total_rows());
    Ok(SingleDqaInfo {
        input_proj_target: Arc::new(refs.target),
        dqa_group_clause,
        num_distinct_groups,
    })
}

/// Tuple-split plan for a `MultiDqa` query.
#[derive(Debug, Clone)]
pub struct MultiDqaInfo {
    /// Input target plus every DISTINCT argument, all with refs.
    pub input_proj_target: Arc<PathTarget>,
    /// `input_proj_target` plus the shape id column.
    pub tup_split_target: Arc<PathTarget>,
    /// Shape id, then every DISTINCT argument, then `GROUP BY`.
    pub dqa_group_clause: Vec<SortGroupClause>,
    /// One entry per shape, ids counting from 1.
    pub dqa_exprs: Vec<DqaExpr>,
    /// Sum over shapes of the distinct `(GROUP BY, shape args)` combinations.
    pub num_distinct_groups: f64,
    /// Partial and final targets with each DISTINCT aggregate tagged by its shape id
    /// and its FILTER moved into the shape.
    pub partial_target: Arc<PathTarget>,
    pub final_target: Arc<PathTarget>,
}

pub fn fetch_multi_dqas_info(
    ctx: &PlannerContext<'_>,
    path: &Path,
    grouping: &GroupingInput<'_>,
) -> PlanResult<MultiDqaInfo> {
    let group_clause = &ctx.query.group_clause;
    let distinct_aggrefs = &grouping.agg_costs.distinct_aggrefs;
    let total_rows = path.total_rows();
    let group_exprs = path.target.clause_exprs(group_clause)?;

    let mut refs = RefAllocator::new(ctx, path);
    let mut arg_clauses = Vec::new();
    let mut dqa_exprs: Vec<DqaExpr> = Vec::new();
    let mut shape_ids = Vec::with_capacity(distinct_aggrefs.len());
    let mut num_distinct_groups = 0.0;

    for agg in distinct_aggrefs {
        let mut arg_refs = BitmapSet::new();
        let mut shape_exprs = group_exprs.clone();
        for clause in &agg.distinct {
            let arg = get_sortgroupref_tle(clause.tle_sort_group_ref, &agg.args)?;
            let (sortgroupref, assigned) = refs.resolve(&arg.expr);
            if assigned {
                arg_clauses.push(dedup_clause(clause, sortgroupref));
            }
            arg_refs.add_member(sortgroupref as usize);
            shape_exprs.push(arg.expr.clone());
        }

        let filter = agg.filter.as_deref().cloned();
        // A volatile FILTER evaluates differently per aggregate, so it never shares.
        let shared = match &filter {
            Some(f) if f.contains_volatile_functions() => None,
            _ => dqa_exprs
                .iter()
                .find(|d| d.agg_args_id_bms == arg_refs && d.agg_filter == filter)
                .map(|d| d.agg_expr_id),
        };
        let shape_id = match shared {
            Some(id) => id,
            None => {
                let id = dqa_exprs.len() as u32 + 1;
                dqa_exprs.push(DqaExpr {
                    agg_expr_id: id,
                    agg_args_id_bms: arg_refs,
                    agg_filter: filter,
                });
                num_distinct_groups += ctx.estimator.estimate_num_groups(&shape_exprs, total_rows);
                id
            }
        };
        shape_ids.push(shape_id);
    }
    trace!("{} DISTINCT aggregates in {} shapes", distinct_aggrefs.len(), dqa_exprs.len());

    let input_proj_target = refs.target.clone();
    let shape_ref = refs.next_ref();
    let mut tup_split_target = refs.target;
    tup_split_target.add_column(Expr::AggExprId, shape_ref);

    let mut dqa_group_clause = Vec::with_capacity(1 + arg_clauses.len() + group_clause.len());
    dqa_group_clause.push(SortGroupClause::for_expr(shape_ref, &Expr::AggExprId));
    dqa_group_clause.extend(arg_clauses);
    dqa_group_clause.extend(group_clause.iter().cloned());

    // Equal aggregates are matched in occurrence order, so two copies of a
    // volatile-filtered aggregate keep their separate shapes.
    let tag = |target: &PathTarget| {
        let mut tagged = target.clone();
        let mut consumed = vec![false; distinct_aggrefs.len()];
        for expr in &mut tagged.exprs {
            expr.map_aggrefs(&mut |agg| {
                if !agg.is_distinct() {
                    return;
                }
                let mut matches = distinct_aggrefs
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| *d == &*agg)
                    .map(|(j, _)| j);
                let Some(first) = matches.next() else {
                    return;
                };
                let j = std::iter::once(first).chain(matches).find(|&j| !consumed[j]).unwrap_or(first);
                consumed[j] = true;
                agg.agg_expr_id = shape_ids[j];
                agg.filter = None;
            });
        }
        Arc::new(tagged)
    };

    Ok(MultiDqaInfo {
        input_proj_target: Arc::new(input_proj_target),
        tup_split_target: Arc::new(tup_split_target),
        dqa_group_clause,
        dqa_exprs,
        num_distinct_groups,
        partial_target: tag(&grouping.partial_target),
        final_target: tag(&grouping.target),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use mppx_core::cost::AggClauseCosts;
    use mppx_core::expr::DataType;
    use mppx_core::locus::Locus;
    use mppx_core::query::PlannerQuery;
    use mppx_core::target::TargetEntry;

    fn count_distinct(arg: Expr) -> Aggref {
        Aggref::distinct("count", vec![arg], DataType::Int8)
    }

    fn target_with(aggs: &[Aggref]) -> Arc<PathTarget> {
        let mut target = PathTarget::new();
        for agg in aggs {
            target.add_column(Expr::Aggref(Box::new(agg.clone())), 0);
        }
        Arc::new(target)
    }

    fn classify(distinct: Vec<Aggref>, output: &[Aggref]) -> DqaType {
        let costs = AggClauseCosts {
            num_aggs: output.len(),
            distinct_aggrefs: distinct,
            ..Default::default()
        };
        let target = target_with(output);
        let grouping = GroupingInput {
            target: Arc::clone(&target),
            partial_target: target,
            agg_costs: &costs,
            agg_partial_costs: &costs,
            agg_final_costs: &costs,
            num_groups_total: 1.0,
        };
        recognize_dqa_type(&grouping)
    }

    #[test]
    fn test_single_shape_and_plain_agg_upgrade() {
        let b = col(1, "b");
        let cd = count_distinct(b.clone());
        let sd = Aggref::distinct("sum", vec![b.clone()], DataType::Int8);
        assert_eq!(classify(vec![cd.clone(), sd.clone()], &[cd.clone(), sd]), DqaType::SingleDqa);

        let plain = Aggref::new("sum", vec![col(1, "c")], DataType::Int8);
        assert_eq!(classify(vec![cd.clone()], &[cd, plain]), DqaType::SingleDqaWithAgg);
    }

    #[test]
    fn test_multi_shape_and_upgrade() {
        let cb = count_distinct(col(1, "b"));
        let cc = count_distinct(col(1, "c"));
        assert_eq!(classify(vec![cb.clone(), cc.clone()], &[cb.clone(), cc.clone()]), DqaType::MultiDqa);

        let plain = Aggref::new("max", vec![col(1, "d")], DataType::Int4);
        assert_eq!(classify(vec![cb.clone(), cc.clone()], &[cb, cc, plain]), DqaType::MultiDqaWithAgg);
    }

    #[test]
    fn test_ordered_or_unhashable_is_invalid() {
        let mut ordered = count_distinct(col(1, "b"));
        ordered.order_by = ordered.distinct.clone();
        assert_eq!(classify(vec![ordered.clone()], &[ordered]), DqaType::Invalid);

        let point = count_distinct(Expr::column(1, "p", 0, DataType::Point));
        assert_eq!(classify(vec![point.clone()], &[point]), DqaType::Invalid);

        // A later invalid aggregate still invalidates the whole query.
        let ok = count_distinct(col(1, "b"));
        let point = count_distinct(Expr::column(1, "p", 0, DataType::Point));
        assert_eq!(classify(vec![ok.clone(), point.clone()], &[ok, point]), DqaType::Invalid);
    }

    /// `GROUP BY a` over an input target `(a ref 1, b, c)`.
    fn grouped_fixture() -> (Fixture, Arc<Path>) {
        let a = col(1, "a");
        let mut query = PlannerQuery::default();
        query.processed_tlist = vec![TargetEntry::new(a.clone(), 1).with_ref(1)];
        query.group_clause = vec![SortGroupClause::for_expr(1, &a)];
        let fx = Fixture::new().with_query(query);

        let mut input = PathTarget::new();
        input.add_column(a, 1);
        input.add_column(col(1, "b"), 0);
        input.add_column(col(1, "c"), 0);
        let path = scan_path(&[1], Locus::strewn(3), 1000.0, Arc::new(input));
        (fx, path)
    }

    #[test]
    fn test_single_info_assigns_refs() {
        let (fx, path) = grouped_fixture();
        let cd = count_distinct(col(1, "b"));
        let costs = AggClauseCosts {
            num_aggs: 1,
            distinct_aggrefs: vec![cd.clone()],
            ..Default::default()
        };
        let target = target_with(&[cd]);
        let grouping = GroupingInput {
            target: Arc::clone(&target),
            partial_target: target,
            agg_costs: &costs,
            agg_partial_costs: &costs,
            agg_final_costs: &costs,
            num_groups_total: 200.0,
        };

        let info = fetch_single_dqa_info(&fx.ctx(), &path, &grouping).unwrap();
        assert_eq!(info.input_proj_target.sortgrouprefs, vec![1, 2, 0]);
        let refs: Vec<u32> = info.dqa_group_clause.iter().map(|c| c.tle_sort_group_ref).collect();
        assert_eq!(refs, vec![1, 2]);
        assert!(info.dqa_group_clause.iter().all(|c| c.hashable));
        // 200 * 200 combinations, capped by the 3000 input rows.
        assert_eq!(info.num_distinct_groups, 3000.0);
    }

    #[test]
    fn test_multi_info_shares_shapes() {
        let (fx, path) = grouped_fixture();
        let (b, c, d) = (col(1, "b"), col(1, "c"), col(1, "d"));
        let filter = Expr::eq_op(col(1, "c"), col(1, "a"));
        let aggs = vec![
            count_distinct(b.clone()),
            Aggref::distinct("sum", vec![b.clone()], DataType::Int8),
            count_distinct(c.clone()),
            count_distinct(b.clone()).with_filter(filter),
            count_distinct(d.clone()),
        ];
        let costs = AggClauseCosts {
            num_aggs: aggs.len(),
            distinct_aggrefs: aggs.clone(),
            ..Default::default()
        };
        let target = target_with(&aggs);
        let grouping = GroupingInput {
            target: Arc::clone(&target),
            partial_target: target,
            agg_costs: &costs,
            agg_partial_costs: &costs,
            agg_final_costs: &costs,
            num_groups_total: 200.0,
        };

        let info = fetch_multi_dqas_info(&fx.ctx(), &path, &grouping).unwrap();
        let ids: Vec<u32> = info.dqa_exprs.iter().map(|d| d.agg_expr_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(info.dqa_exprs[2].agg_filter.is_some());

        // b gets ref 2, c ref 3, d is added with ref 4, the shape id takes ref 5.
        assert_eq!(info.input_proj_target.sortgrouprefs, vec![1, 2, 3, 4]);
        assert_eq!(info.tup_split_target.exprs.last(), Some(&Expr::AggExprId));
        let refs: Vec<u32> = info.dqa_group_clause.iter().map(|c| c.tle_sort_group_ref).collect();
        assert_eq!(refs, vec![5, 2, 3, 4, 1]);

        let tagged: Vec<(u32, bool)> = info
            .final_target
            .exprs
            .iter()
            .flat_map(|e| e.collect_aggrefs())
            .map(|agg| (agg.agg_expr_id, agg.filter.is_some()))
            .collect();
        assert_eq!(tagged, vec![(1, false), (1, false), (2, false), (3, false), (4, false)]);
        assert!(info.num_distinct_groups >= 4.0);
    }

    #[test]
    fn test_volatile_filters_never_share() {
        let (fx, path) = grouped_fixture();
        let random = Expr::Function {
            name: "random".into(),
            args: Vec::new(),
            return_type: DataType::Bool,
            volatile: true,
        };
        let agg = count_distinct(col(1, "b")).with_filter(random);
        let costs = AggClauseCosts {
            num_aggs: 2,
            distinct_aggrefs: vec![agg.clone(), agg.clone()],
            ..Default::default()
        };
        let target = target_with(&[agg.clone(), agg]);
        let grouping = GroupingInput {
            target: Arc::clone(&target),
            partial_target: target,
            agg_costs: &costs,
            agg_partial_costs: &costs,
            agg_final_costs: &costs,
            num_groups_total: 200.0,
        };
        let info = fetch_multi_dqas_info(&fx.ctx(), &path, &grouping).unwrap();
        assert_eq!(info.dqa_exprs.len(), 2);

        // Each copy reads its own shape, in both stages.
        for target in [&info.partial_target, &info.final_target] {
            let tagged: Vec<(u32, bool)> = target
                .exprs
                .iter()
                .flat_map(|e| e.collect_aggrefs())
                .map(|agg| (agg.agg_expr_id, agg.filter.is_some()))
                .collect();
            assert_eq!(tagged, vec![(1, false), (2, false)]);
        }
    }
}
