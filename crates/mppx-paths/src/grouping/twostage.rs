//! Two-stage aggregation without DISTINCT de-duplication.
//!
//! Sorted: partial group-aggregate per segment, an order-preserving gather, then the
//! final group-aggregate on one worker. Hashed: partial hash-aggregate, redistribute
//! by the grouping key, final hash-aggregate on every segment.

use super::dqa::{fetch_single_dqa_info, DqaType};
use super::{hash_table_fits, log_candidate, per_segment, GroupingInput};
use crate::grouping_locus::choose_grouping_locus;
use crate::motion::create_motion_path;
use crate::pathnode::{
    apply_projection_to_path, clamp_row_est, create_agg_path, create_groupingsets_path, create_sort_path, AggSpec,
};
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::error::PlanResult;
use mppx_core::expr::Expr;
use mppx_core::locus::Locus;
use mppx_core::path::{AggSplit, AggStrategy, Path};
use mppx_core::pathkeys::make_pathkeys_for_sortclauses;
use mppx_core::target::{add_gsetid_groupclause, add_gsetid_tlist, PathTarget};
use std::sync::Arc;
use tracing::trace;

fn sorted_or_plain(has_group_clause: bool) -> AggStrategy {
    if has_group_clause {
        AggStrategy::Sorted
    } else {
        AggStrategy::Plain
    }
}

pub fn add_twostage_group_agg_path(
    ctx: &PlannerContext<'_>,
    path: &Arc<Path>,
    is_sorted: bool,
    grouping: &GroupingInput<'_>,
    dqa_type: DqaType,
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    let query = ctx.query;
    let group_clause = &query.group_clause;

    // Partial rows of different grouping sets are told apart by a grouping-set id,
    // which the final stage groups on first.
    let mut gsets = None;
    let mut partial_target = Arc::clone(&grouping.partial_target);
    if query.has_grouping_sets() {
        let mut tlist = query.processed_tlist.clone();
        let gsetid_ref = add_gsetid_tlist(&mut tlist)?;
        if !partial_target.contains_grouping_set_id() {
            let mut with_id = (*partial_target).clone();
            with_id.add_column(Expr::GroupingSetId, gsetid_ref);
            partial_target = Arc::new(with_id);
        }
        gsets = Some((tlist, add_gsetid_groupclause(group_clause, gsetid_ref)));
    }

    let group_locus = choose_grouping_locus(ctx, path, &grouping.target, group_clause, &query.grouping_sets)?;
    if !group_locus.need_redistribute {
        trace!("input already grouped by locus; two-stage sorted aggregation skipped");
        return Ok(());
    }

    let mut path = Arc::clone(path);
    if grouping.agg_costs.has_distinct() {
        if dqa_type != DqaType::SingleDqa {
            return Ok(());
        }
        // Partial DISTINCT aggregates are only exact when each DISTINCT value lives on
        // one segment.
        let info = fetch_single_dqa_info(ctx, &path, grouping)?;
        path = apply_projection_to_path(ctx, path, Arc::clone(&info.input_proj_target));
        let distinct_locus = choose_grouping_locus(ctx, &path, &info.input_proj_target, &info.dqa_group_clause, &[])?;
        if distinct_locus.need_redistribute {
            trace!("DISTINCT key not collocated; two-stage sorted aggregation skipped");
            return Ok(());
        }
    }

    let group_pathkeys = query.group_pathkeys()?;
    if !is_sorted && !group_pathkeys.is_empty() && !path.is_sorted_on(&group_pathkeys) {
        path = create_sort_path(ctx, path, group_pathkeys);
    }

    let partial_groups =
        ctx.estimator
            .estimate_num_groups_on_segment(grouping.num_groups_total, path.rows, &path.locus);
    let (partial, motion_pathkeys) = if gsets.is_some() {
        let partial = create_groupingsets_path(
            ctx,
            path,
            partial_target,
            query.grouping_sets.clone(),
            AggSplit::InitialSerial,
            grouping.agg_partial_costs,
            partial_groups,
        );
        (partial, Vec::new())
    } else {
        let spec = AggSpec::new(
            sorted_or_plain(!group_clause.is_empty()),
            AggSplit::InitialSerial,
            group_clause.clone(),
            grouping.agg_partial_costs,
            partial_groups,
        );
        let partial = create_agg_path(ctx, path, partial_target, spec);
        let pathkeys = partial.pathkeys.clone();
        (partial, pathkeys)
    };

    let single = Locus::single_qe(ctx.config.segment_count);
    let Some(gathered) = create_motion_path(ctx, partial, motion_pathkeys, single) else {
        return Ok(());
    };

    let final_path = match gsets {
        Some((tlist, gsets_clause)) => {
            let pathkeys = make_pathkeys_for_sortclauses(&gsets_clause, &PathTarget::from_tlist(&tlist))?;
            let sorted = create_sort_path(ctx, gathered, pathkeys);
            let spec = AggSpec::new(
                AggStrategy::Sorted,
                AggSplit::FinalDeserial,
                gsets_clause,
                grouping.agg_final_costs,
                grouping.num_groups_total,
            )
            .with_qual(query.having_qual.clone());
            create_agg_path(ctx, sorted, Arc::clone(&grouping.target), spec)
        }
        None => {
            let spec = AggSpec::new(
                sorted_or_plain(!group_clause.is_empty()),
                AggSplit::FinalDeserial,
                group_clause.clone(),
                grouping.agg_final_costs,
                grouping.num_groups_total,
            )
            .with_qual(query.having_qual.clone());
            create_agg_path(ctx, gathered, Arc::clone(&grouping.target), spec)
        }
    };
    log_candidate("two-stage sorted", &final_path);
    collector.add_path(final_path);
    Ok(())
}

pub fn add_twostage_hash_agg_path(
    ctx: &PlannerContext<'_>,
    path: &Arc<Path>,
    grouping: &GroupingInput<'_>,
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    let query = ctx.query;
    let group_clause = &query.group_clause;
    // Plain aggregation has one group, which the sorted strategy already gathers.
    if group_clause.is_empty() || query.has_grouping_sets() {
        return Ok(());
    }

    let group_locus = choose_grouping_locus(ctx, path, &grouping.target, group_clause, &[])?;
    if !group_locus.need_redistribute {
        trace!("input already grouped by locus; two-stage hashed aggregation skipped");
        return Ok(());
    }

    let num_groups = if group_locus.locus.is_partitioned() {
        clamp_row_est(per_segment(grouping.num_groups_total, &group_locus.locus))
    } else {
        grouping.num_groups_total
    };
    if hash_table_fits(ctx, num_groups, path.target.width).is_none() {
        return Ok(());
    }

    let partial_groups =
        ctx.estimator
            .estimate_num_groups_on_segment(grouping.num_groups_total, path.rows, &path.locus);
    let partial = create_agg_path(
        ctx,
        Arc::clone(path),
        Arc::clone(&grouping.partial_target),
        AggSpec::new(
            AggStrategy::Hashed,
            AggSplit::InitialSerial,
            group_clause.clone(),
            grouping.agg_partial_costs,
            partial_groups,
        ),
    );
    let Some(moved) = create_motion_path(ctx, partial, Vec::new(), group_locus.locus) else {
        return Ok(());
    };
    let final_path = create_agg_path(
        ctx,
        moved,
        Arc::clone(&grouping.target),
        AggSpec::new(
            AggStrategy::Hashed,
            AggSplit::FinalDeserial,
            group_clause.clone(),
            grouping.agg_final_costs,
            num_groups,
        )
        .with_qual(query.having_qual.clone()),
    );
    log_candidate("two-stage hashed", &final_path);
    collector.add_path(final_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use mppx_core::cost::AggClauseCosts;
    use mppx_core::expr::{Aggref, DataType};
    use mppx_core::path::{MotionType, PathKind};
    use mppx_core::pathkeys::PathKey;
    use mppx_core::query::{PlannerQuery, Rollup};
    use mppx_core::target::{SortGroupClause, TargetEntry};

    fn sum_b() -> Expr {
        Expr::Aggref(Box::new(Aggref::new("sum", vec![col(1, "b")], DataType::Int8)))
    }

    /// `SELECT a, sum(b) ... GROUP BY a`, optionally as `GROUP BY ROLLUP (a)`.
    fn query(rollup: bool) -> PlannerQuery {
        let a = col(1, "a");
        let mut query = PlannerQuery::default();
        query.processed_tlist = vec![TargetEntry::new(a.clone(), 1).with_ref(1), TargetEntry::new(sum_b(), 2)];
        query.group_clause = vec![SortGroupClause::for_expr(1, &a)];
        if rollup {
            query.grouping_sets = vec![Rollup {
                group_clause: query.group_clause.clone(),
                gsets: vec![vec![0], vec![]],
            }];
        }
        query
    }

    fn input(locus: Locus) -> Arc<Path> {
        let mut target = PathTarget::new();
        target.add_column(col(1, "a"), 1);
        target.add_column(col(1, "b"), 0);
        scan_path(&[1], locus, 1000.0, Arc::new(target))
    }

    fn run_sorted(fx: &Fixture, path: &Arc<Path>, is_sorted: bool) -> Vec<Arc<Path>> {
        let costs = AggClauseCosts {
            num_aggs: 1,
            ..Default::default()
        };
        let target = Arc::new(PathTarget::from_tlist(&fx.query.processed_tlist));
        let grouping = GroupingInput {
            target: Arc::clone(&target),
            partial_target: target,
            agg_costs: &costs,
            agg_partial_costs: &costs,
            agg_final_costs: &costs,
            num_groups_total: 200.0,
        };
        let mut out: Vec<Arc<Path>> = Vec::new();
        add_twostage_group_agg_path(&fx.ctx(), path, is_sorted, &grouping, DqaType::Invalid, &mut out).unwrap();
        out
    }

    fn run_hashed(fx: &Fixture, path: &Arc<Path>) -> Vec<Arc<Path>> {
        let costs = AggClauseCosts {
            num_aggs: 1,
            ..Default::default()
        };
        let target = Arc::new(PathTarget::from_tlist(&fx.query.processed_tlist));
        let grouping = GroupingInput {
            target: Arc::clone(&target),
            partial_target: target,
            agg_costs: &costs,
            agg_partial_costs: &costs,
            agg_final_costs: &costs,
            num_groups_total: 200.0,
        };
        let mut out: Vec<Arc<Path>> = Vec::new();
        add_twostage_hash_agg_path(&fx.ctx(), path, &grouping, &mut out).unwrap();
        out
    }

    #[test]
    fn test_sorted_two_stage_shape() {
        let fx = Fixture::new().with_query(query(false));
        let out = run_sorted(&fx, &input(Locus::strewn(3)), false);
        assert_eq!(out.len(), 1);

        let root = &out[0];
        assert_eq!(root.locus, Locus::single_qe(3));
        assert_eq!(root.pathkeys, vec![PathKey::asc(col(1, "a"))]);
        let PathKind::Agg {
            subpath: gather,
            strategy: AggStrategy::Sorted,
            split: AggSplit::FinalDeserial,
            num_groups,
            ..
        } = &root.kind
        else {
            panic!("expected sorted final aggregate, got {:?}", root.kind);
        };
        assert_eq!(*num_groups, 200.0);
        let PathKind::Motion {
            subpath: partial,
            motion: MotionType::Gather,
        } = &gather.kind
        else {
            panic!("expected gather");
        };
        assert!(matches!(
            partial.kind,
            PathKind::Agg {
                split: AggSplit::InitialSerial,
                ..
            }
        ));
        assert!(partial.find(&|p| matches!(p.kind, PathKind::Sort { .. })).is_some());
    }

    #[test]
    fn test_collocated_input_skips_two_stage() {
        let fx = Fixture::new().with_query(query(false));
        let path = input(hashed(&[col(1, "a")]));
        assert!(run_sorted(&fx, &path, false).is_empty());
        assert!(run_hashed(&fx, &path).is_empty());
    }

    #[test]
    fn test_grouping_sets_final_sorts_on_set_id() {
        let fx = Fixture::new().with_query(query(true));
        let out = run_sorted(&fx, &input(Locus::strewn(3)), false);
        assert_eq!(out.len(), 1);

        let PathKind::Agg {
            subpath: sort,
            group_clause,
            ..
        } = &out[0].kind
        else {
            panic!("expected final aggregate");
        };
        assert_eq!(group_clause.len(), 2);
        assert_eq!(group_clause[0].tle_sort_group_ref, 2);
        assert_eq!(sort.pathkeys[0], PathKey::asc(Expr::GroupingSetId));
        assert!(out[0].find(&|p| matches!(p.kind, PathKind::GroupingSets { .. })).is_some());
    }

    #[test]
    fn test_hashed_two_stage_redistributes() {
        let fx = Fixture::new().with_query(query(false));
        let out = run_hashed(&fx, &input(Locus::strewn(3)));
        assert_eq!(out.len(), 1);
        let root = &out[0];
        assert_eq!(root.locus, hashed(&[col(1, "a")]));
        assert!(matches!(
            root.kind,
            PathKind::Agg {
                strategy: AggStrategy::Hashed,
                split: AggSplit::FinalDeserial,
                ..
            }
        ));
        // 200 groups over 3 segments.
        assert_eq!(root.rows, 67.0);
    }

    #[test]
    fn test_hashed_two_stage_respects_work_mem() {
        let mut fx = Fixture::new().with_query(query(false));
        fx.config.work_mem_kb = 0;
        assert!(run_hashed(&fx, &input(Locus::strewn(3))).is_empty());
    }
}
