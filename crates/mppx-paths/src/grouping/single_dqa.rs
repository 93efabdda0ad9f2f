//! # Single DISTINCT Shape
//!
//! Aggregates whose DISTINCT arguments all agree, optionally with a GROUP BY. The
//! aggregate node cannot de-duplicate by hashing itself, so every plan here runs a
//! separate de-duplicating hash aggregate on `GROUP BY ∪ DISTINCT args` first and
//! then aggregates the de-duplicated rows.
//!
//! Which plan applies depends on where the input already sits:
//!
//! | Input collocated on | Plan |
//! |---------------------|------|
//! | DISTINCT key or GROUP BY key | dedup → [redistribute by GROUP BY] → final |
//! | neither, GROUP BY locus is hashed | [streaming dedup] → redistribute by GROUP BY → dedup → final |
//! | neither, DISTINCT locus is hashed | streaming dedup → redistribute by DISTINCT key → dedup → partial → motion by GROUP BY → final |
//!
//! Anything else abstains.

use super::dqa::SingleDqaInfo;
use super::{hash_table_fits, log_candidate, GroupingInput};
use crate::grouping_locus::choose_grouping_locus;
use crate::motion::create_motion_path;
use crate::pathnode::{apply_projection_to_path, clamp_row_est, create_agg_path, AggSpec};
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::error::PlanResult;
use mppx_core::path::{AggSplit, AggStrategy, Path};
use mppx_core::target::strip_aggdistinct;
use std::sync::Arc;
use tracing::{debug, trace};

pub fn add_single_dqa_hash_agg_path(
    ctx: &PlannerContext<'_>,
    path: &Arc<Path>,
    grouping: &GroupingInput<'_>,
    info: &SingleDqaInfo,
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    if !ctx.config.enable_agg_distinct {
        return Ok(());
    }
    let query = ctx.query;
    let group_clause = &query.group_clause;
    let input_target = &info.input_proj_target;
    let num_distinct = info.num_distinct_groups;

    let input = apply_projection_to_path(ctx, Arc::clone(path), Arc::clone(input_target));
    let num_input_segments = if input.locus.is_partitioned() {
        input.locus.num_segments().max(1) as f64
    } else {
        1.0
    };

    let distinct_locus = choose_grouping_locus(ctx, &input, input_target, &info.dqa_group_clause, &[])?;
    let group_locus = choose_grouping_locus(ctx, &input, input_target, group_clause, &[])?;

    // Final groups per segment.
    let num_groups = if group_locus.locus.is_partitioned() {
        clamp_row_est(grouping.num_groups_total / input.locus.num_segments().max(1) as f64)
    } else {
        grouping.num_groups_total
    };
    if hash_table_fits(ctx, num_groups, input.target.width).is_none() {
        return Ok(());
    }

    let final_strategy = if group_clause.is_empty() {
        AggStrategy::Plain
    } else {
        AggStrategy::Hashed
    };
    let dedup = |num_groups: f64| {
        AggSpec::new(
            AggStrategy::Hashed,
            AggSplit::Simple,
            info.dqa_group_clause.clone(),
            grouping.agg_partial_costs,
            num_groups,
        )
    };
    let final_spec = |split: AggSplit| {
        AggSpec::new(
            final_strategy,
            split,
            group_clause.clone(),
            grouping.agg_final_costs,
            num_groups,
        )
        .with_qual(query.having_qual.clone())
    };

    let final_path = if !distinct_locus.need_redistribute || !group_locus.need_redistribute {
        debug!("single DISTINCT: input collocated, de-duplicating in place");
        let mut path = create_agg_path(
            ctx,
            input,
            Arc::clone(input_target),
            dedup(num_distinct / num_input_segments),
        );
        if group_locus.need_redistribute {
            let Some(moved) = create_motion_path(ctx, path, Vec::new(), group_locus.locus) else {
                return Ok(());
            };
            path = moved;
        }
        create_agg_path(
            ctx,
            path,
            Arc::clone(&grouping.target),
            final_spec(AggSplit::Deduplicated),
        )
    } else if group_locus.locus.is_hashed() {
        debug!("single DISTINCT: de-duplicating by the GROUP BY locus");
        let input_rows = input.rows;
        let mut path = input;
        if ctx.config.enable_dqa_pruning {
            let groups = ctx
                .estimator
                .estimate_num_groups_on_segment(num_distinct, input_rows, &path.locus);
            path = create_agg_path(ctx, path, Arc::clone(input_target), dedup(groups).streaming());
        }
        let group_segments = group_locus.locus.num_segments().max(1) as f64;
        let Some(moved) = create_motion_path(ctx, path, Vec::new(), group_locus.locus) else {
            return Ok(());
        };
        let deduped = create_agg_path(
            ctx,
            moved,
            Arc::clone(input_target),
            dedup(num_distinct / group_segments),
        );
        create_agg_path(
            ctx,
            deduped,
            Arc::clone(&grouping.target),
            final_spec(AggSplit::Deduplicated),
        )
    } else if distinct_locus.locus.is_hashed() {
        debug!("single DISTINCT: de-duplicating by the DISTINCT locus");
        let input_rows = input.rows;
        let input_locus = input.locus.clone();
        let groups = ctx
            .estimator
            .estimate_num_groups_on_segment(num_distinct, input_rows, &input_locus);
        let streaming = create_agg_path(ctx, input, Arc::clone(input_target), dedup(groups).streaming());
        let distinct_segments = distinct_locus.locus.num_segments().max(1) as f64;
        let Some(moved) = create_motion_path(ctx, streaming, Vec::new(), distinct_locus.locus) else {
            return Ok(());
        };
        let deduped = create_agg_path(
            ctx,
            moved,
            Arc::clone(input_target),
            dedup(num_distinct / distinct_segments),
        );

        let partial_groups =
            ctx.estimator
                .estimate_num_groups_on_segment(grouping.num_groups_total, input_rows, &deduped.locus);
        let partial = create_agg_path(
            ctx,
            deduped,
            Arc::new(strip_aggdistinct(&grouping.partial_target)),
            AggSpec::new(
                final_strategy,
                AggSplit::InitialSerialDeduplicated,
                group_clause.clone(),
                grouping.agg_partial_costs,
                partial_groups,
            ),
        );
        let Some(moved) = create_motion_path(ctx, partial, Vec::new(), group_locus.locus) else {
            return Ok(());
        };
        create_agg_path(
            ctx,
            moved,
            Arc::clone(&grouping.target),
            final_spec(AggSplit::FinalDeserialDeduplicated),
        )
    } else {
        trace!("single DISTINCT: neither GROUP BY nor DISTINCT locus is hashed");
        return Ok(());
    };

    log_candidate("single DISTINCT", &final_path);
    collector.add_path(final_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::dqa::fetch_single_dqa_info;
    use crate::test_support::*;
    use mppx_core::cost::AggClauseCosts;
    use mppx_core::expr::{Aggref, DataType, Expr};
    use mppx_core::locus::Locus;
    use mppx_core::path::{MotionType, PathKind};
    use mppx_core::query::PlannerQuery;
    use mppx_core::target::{PathTarget, SortGroupClause, TargetEntry};

    fn count_distinct_b() -> Aggref {
        Aggref::distinct("count", vec![col(1, "b")], DataType::Int8)
    }

    /// `SELECT [a,] count(DISTINCT b) FROM r1 [GROUP BY a]`.
    fn fixture(grouped: bool) -> Fixture {
        let a = col(1, "a");
        let mut query = PlannerQuery::default();
        if grouped {
            query.processed_tlist.push(TargetEntry::new(a.clone(), 1).with_ref(1));
            query.group_clause = vec![SortGroupClause::for_expr(1, &a)];
        }
        let resno = query.processed_tlist.len() as u32 + 1;
        query
            .processed_tlist
            .push(TargetEntry::new(Expr::Aggref(Box::new(count_distinct_b())), resno));
        Fixture::new().with_query(query)
    }

    fn input(locus: Locus) -> Arc<Path> {
        let mut target = PathTarget::new();
        target.add_column(col(1, "a"), 1);
        target.add_column(col(1, "b"), 0);
        scan_path(&[1], locus, 1000.0, Arc::new(target))
    }

    fn run(fx: &Fixture, path: &Arc<Path>) -> Vec<Arc<Path>> {
        let costs = AggClauseCosts {
            num_aggs: 1,
            distinct_aggrefs: vec![count_distinct_b()],
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
        let ctx = fx.ctx();
        let info = fetch_single_dqa_info(&ctx, path, &grouping).unwrap();
        let mut out: Vec<Arc<Path>> = Vec::new();
        add_single_dqa_hash_agg_path(&ctx, path, &grouping, &info, &mut out).unwrap();
        out
    }

    fn motions(path: &Path) -> Vec<MotionType> {
        let mut out = Vec::new();
        let mut node = Some(path);
        while let Some(p) = node {
            if let PathKind::Motion { motion, .. } = p.kind {
                out.push(motion);
            }
            node = p.subpaths().into_iter().next().map(|s| &**s);
        }
        out
    }

    #[test]
    fn test_grouped_input_dedups_in_place() {
        let fx = fixture(true);
        let path = input(hashed(&[col(1, "a")]));
        let out = run(&fx, &path);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].locus, path.locus);
        assert!(motions(&out[0]).is_empty());
        assert!(matches!(
            out[0].kind,
            PathKind::Agg {
                split: AggSplit::Deduplicated,
                strategy: AggStrategy::Hashed,
                ..
            }
        ));
    }

    #[test]
    fn test_group_locus_case_prunes_before_motion() {
        let mut fx = fixture(true);
        let path = input(Locus::strewn(3));
        let out = run(&fx, &path);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].locus, hashed(&[col(1, "a")]));
        assert_eq!(motions(&out[0]), vec![MotionType::Redistribute]);
        assert!(out[0].find(&|p| matches!(p.kind, PathKind::Agg { streaming: true, .. })).is_some());

        fx.config.enable_dqa_pruning = false;
        let out = run(&fx, &path);
        assert!(out[0].find(&|p| matches!(p.kind, PathKind::Agg { streaming: true, .. })).is_none());
    }

    #[test]
    fn test_distinct_locus_case_without_group_by() {
        let fx = fixture(false);
        let out = run(&fx, &input(Locus::strewn(3)));
        assert_eq!(out.len(), 1);

        let root = &out[0];
        assert_eq!(root.locus, Locus::single_qe(3));
        assert!(matches!(
            root.kind,
            PathKind::Agg {
                strategy: AggStrategy::Plain,
                split: AggSplit::FinalDeserialDeduplicated,
                ..
            }
        ));
        assert_eq!(motions(root), vec![MotionType::Gather, MotionType::Redistribute]);
        let partial = root
            .find(&|p| {
                matches!(
                    p.kind,
                    PathKind::Agg {
                        split: AggSplit::InitialSerialDeduplicated,
                        ..
                    }
                )
            })
            .unwrap();
        let distinct_left: usize = partial
            .target
            .exprs
            .iter()
            .flat_map(|e| e.collect_aggrefs())
            .filter(|a| a.is_distinct())
            .count();
        assert_eq!(distinct_left, 0);
    }

    #[test]
    fn test_hash_budget_or_flag_abstains() {
        let mut fx = fixture(true);
        fx.config.work_mem_kb = 0;
        assert!(run(&fx, &input(Locus::strewn(3))).is_empty());

        let mut fx = fixture(true);
        fx.config.enable_agg_distinct = false;
        assert!(run(&fx, &input(Locus::strewn(3))).is_empty());
    }
}
