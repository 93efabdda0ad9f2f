//! # Several DISTINCT Shapes
//!
//! ```text
//! Final Aggregate
//!   -> Gather
//!        -> Partial Aggregate
//!             -> Hash Aggregate, de-duplicating (GROUP BY only)
//!                  -> Redistribute by (shape id, args, GROUP BY)
//!                       -> [Streaming Hash Aggregate, de-duplicating]
//!                            -> Tuple Split
//!                                 -> input
//! ```
//!
//! The tuple split emits each input row once per shape with the shape id set and
//! the other shapes' arguments nulled. Every aggregate above it only consumes the
//! rows whose shape id matches its own.

use super::dqa::MultiDqaInfo;
use super::{hash_table_fits, log_candidate, GroupingInput};
use crate::grouping_locus::choose_grouping_locus;
use crate::motion::create_motion_path;
use crate::pathnode::{apply_projection_to_path, create_agg_path, create_tuple_split_path, AggSpec};
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::cost::AggClauseCosts;
use mppx_core::error::PlanResult;
use mppx_core::locus::Locus;
use mppx_core::path::{AggSplit, AggStrategy, Path};
use mppx_core::target::strip_aggdistinct;
use std::sync::Arc;
use tracing::debug;

pub fn add_multi_dqas_hash_agg_path(
    ctx: &PlannerContext<'_>,
    path: &Arc<Path>,
    grouping: &GroupingInput<'_>,
    info: &MultiDqaInfo,
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    if !ctx.config.enable_agg_distinct {
        return Ok(());
    }
    if hash_table_fits(ctx, grouping.num_groups_total, path.target.width).is_none() {
        return Ok(());
    }
    let query = ctx.query;
    let group_clause = &query.group_clause;

    let input = apply_projection_to_path(ctx, Arc::clone(path), Arc::clone(&info.input_proj_target));
    let mut path = create_tuple_split_path(
        ctx,
        input,
        Arc::clone(&info.tup_split_target),
        group_clause.clone(),
        info.dqa_exprs.clone(),
    );
    debug!("tuple split into {} DISTINCT shapes", info.dqa_exprs.len());

    let dedup_costs = AggClauseCosts::from_exprs(&info.tup_split_target.exprs);
    if ctx.config.enable_dqa_pruning {
        // Rows of one shape carry NULLs for every other shape's arguments, so the
        // comparison cost is closer to one column than to the whole key.
        let groups = ctx
            .estimator
            .estimate_num_groups_on_segment(info.num_distinct_groups, path.rows, &path.locus);
        path = create_agg_path(
            ctx,
            path,
            Arc::clone(&info.tup_split_target),
            AggSpec::new(
                AggStrategy::Hashed,
                AggSplit::Simple,
                info.dqa_group_clause.clone(),
                &dedup_costs,
                groups,
            )
            .streaming()
            .costed_as(1),
        );
    }

    let distinct_locus = choose_grouping_locus(ctx, &path, &info.tup_split_target, &info.dqa_group_clause, &[])?;
    if distinct_locus.need_redistribute {
        let Some(moved) = create_motion_path(ctx, path, Vec::new(), distinct_locus.locus) else {
            return Ok(());
        };
        path = moved;
    }

    let input_rows = path.rows;
    let (strategy, split, partial_target) = if group_clause.is_empty() {
        (AggStrategy::Plain, AggSplit::InitialSerial, Arc::clone(&info.partial_target))
    } else {
        let segments = if path.locus.is_partitioned() {
            path.locus.num_segments().max(1) as f64
        } else {
            1.0
        };
        path = create_agg_path(
            ctx,
            path,
            Arc::clone(&info.tup_split_target),
            AggSpec::new(
                AggStrategy::Hashed,
                AggSplit::Simple,
                info.dqa_group_clause.clone(),
                &dedup_costs,
                info.num_distinct_groups / segments,
            ),
        );
        (
            AggStrategy::Hashed,
            AggSplit::InitialSerialDeduplicated,
            Arc::new(strip_aggdistinct(&info.partial_target)),
        )
    };

    let partial_groups =
        ctx.estimator
            .estimate_num_groups_on_segment(grouping.num_groups_total, input_rows, &path.locus);
    let partial = create_agg_path(
        ctx,
        path,
        partial_target,
        AggSpec::new(
            strategy,
            split,
            group_clause.clone(),
            grouping.agg_partial_costs,
            partial_groups,
        ),
    );
    let single = Locus::single_qe(ctx.config.segment_count);
    let Some(gathered) = create_motion_path(ctx, partial, Vec::new(), single) else {
        return Ok(());
    };
    let final_split = if split.is_deduplicated() {
        AggSplit::FinalDeserialDeduplicated
    } else {
        AggSplit::FinalDeserial
    };
    let final_path = create_agg_path(
        ctx,
        gathered,
        Arc::clone(&info.final_target),
        AggSpec::new(
            strategy,
            final_split,
            group_clause.clone(),
            grouping.agg_final_costs,
            grouping.num_groups_total,
        )
        .with_qual(query.having_qual.clone()),
    );
    log_candidate("multi DISTINCT", &final_path);
    collector.add_path(final_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::dqa::fetch_multi_dqas_info;
    use crate::test_support::*;
    use mppx_core::expr::{Aggref, DataType, Expr};
    use mppx_core::path::{MotionType, PathKind};
    use mppx_core::query::PlannerQuery;
    use mppx_core::target::{PathTarget, SortGroupClause, TargetEntry};

    fn distinct_aggs() -> Vec<Aggref> {
        vec![
            Aggref::distinct("count", vec![col(1, "b")], DataType::Int8),
            Aggref::distinct("count", vec![col(1, "c")], DataType::Int8),
        ]
    }

    /// `SELECT [a,] count(DISTINCT b), count(DISTINCT c) FROM r1 [GROUP BY a]`.
    fn fixture(grouped: bool) -> Fixture {
        let a = col(1, "a");
        let mut query = PlannerQuery::default();
        if grouped {
            query.processed_tlist.push(TargetEntry::new(a.clone(), 1).with_ref(1));
            query.group_clause = vec![SortGroupClause::for_expr(1, &a)];
        }
        for agg in distinct_aggs() {
            let resno = query.processed_tlist.len() as u32 + 1;
            query.processed_tlist.push(TargetEntry::new(Expr::Aggref(Box::new(agg)), resno));
        }
        Fixture::new().with_query(query)
    }

    fn run(fx: &Fixture) -> Vec<Arc<Path>> {
        let costs = AggClauseCosts {
            num_aggs: 2,
            distinct_aggrefs: distinct_aggs(),
            ..Default::default()
        };
        let target = Arc::new(PathTarget::from_tlist(&fx.query.processed_tlist));
        let grouping = GroupingInput {
            target: Arc::clone(&target),
            partial_target: target,
            agg_costs: &costs,
            agg_partial_costs: &costs,
            agg_final_costs: &costs,
            num_groups_total: if fx.query.group_clause.is_empty() { 1.0 } else { 200.0 },
        };
        let mut input = PathTarget::new();
        input.add_column(col(1, "a"), 1);
        input.add_column(col(1, "b"), 0);
        input.add_column(col(1, "c"), 0);
        let path = scan_path(&[1], Locus::strewn(3), 1000.0, Arc::new(input));

        let ctx = fx.ctx();
        let info = fetch_multi_dqas_info(&ctx, &path, &grouping).unwrap();
        let mut out: Vec<Arc<Path>> = Vec::new();
        add_multi_dqas_hash_agg_path(&ctx, &path, &grouping, &info, &mut out).unwrap();
        out
    }

    #[test]
    fn test_plain_multi_distinct_splits_per_shape() {
        let fx = fixture(false);
        let out = run(&fx);
        assert_eq!(out.len(), 1);
        let root = &out[0];
        assert_eq!(root.rows, 1.0);
        assert_eq!(root.locus, Locus::single_qe(3));
        assert!(matches!(
            root.kind,
            PathKind::Agg {
                strategy: AggStrategy::Plain,
                split: AggSplit::FinalDeserial,
                ..
            }
        ));
        let split = root.find(&|p| p.tuple_split_fanout().is_some()).unwrap();
        assert_eq!(split.tuple_split_fanout(), Some(2));
        assert!(root.find(&|p| matches!(p.kind, PathKind::Agg { streaming: true, .. })).is_some());
    }

    #[test]
    fn test_grouped_multi_distinct_dedups_after_motion() {
        let fx = fixture(true);
        let out = run(&fx);
        assert_eq!(out.len(), 1);
        let root = &out[0];
        let PathKind::Agg {
            subpath: gather,
            strategy: AggStrategy::Hashed,
            split: AggSplit::FinalDeserialDeduplicated,
            ..
        } = &root.kind
        else {
            panic!("expected de-duplicated final aggregate, got {:?}", root.kind);
        };
        let PathKind::Motion {
            subpath: partial,
            motion: MotionType::Gather,
        } = &gather.kind
        else {
            panic!("expected gather");
        };
        let PathKind::Agg { subpath: dedup, .. } = &partial.kind else {
            panic!("expected partial aggregate");
        };
        let PathKind::Agg {
            subpath: moved,
            streaming: false,
            split: AggSplit::Simple,
            ..
        } = &dedup.kind
        else {
            panic!("expected de-duplicating aggregate");
        };
        assert!(matches!(
            moved.kind,
            PathKind::Motion {
                motion: MotionType::Redistribute,
                ..
            }
        ));
        assert!(moved.locus.is_hashed());
    }

    #[test]
    fn test_streaming_dedup_costed_on_one_column() {
        let fx = fixture(false);
        let out = run(&fx);
        let dedup = out[0]
            .find(&|p| matches!(p.kind, PathKind::Agg { streaming: true, .. }))
            .unwrap();
        let PathKind::Agg {
            subpath: split,
            group_clause,
            num_groups,
            ..
        } = &dedup.kind
        else {
            unreachable!();
        };
        assert!(group_clause.len() > 1);
        let expected = fx.ctx().cost_model.cost_agg(
            AggStrategy::Hashed,
            AggSplit::Simple,
            &AggClauseCosts::from_exprs(&dedup.target.exprs),
            1,
            *num_groups,
            split,
            dedup.target.width,
        );
        assert_eq!(dedup.startup_cost, expected.startup);
        assert_eq!(dedup.total_cost, expected.total);
        assert!(dedup.startup_cost > split.total_cost);
    }

    #[test]
    fn test_oversized_hash_table_abstains() {
        let mut fx = fixture(true);
        fx.config.work_mem_kb = 0;
        assert!(run(&fx).is_empty());
    }
}
