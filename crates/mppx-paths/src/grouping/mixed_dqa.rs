//! One DISTINCT shape mixed with plain aggregates, without GROUP BY.
//!
//! Once the input is hashed on the DISTINCT key, every segment holds all copies of
//! its DISTINCT values, so each segment can compute both kinds of aggregate over its
//! share and a single final stage combines them.

use super::dqa::SingleDqaInfo;
use super::{log_candidate, GroupingInput};
use crate::grouping_locus::choose_grouping_locus;
use crate::motion::create_motion_path;
use crate::pathnode::{apply_projection_to_path, create_agg_path, AggSpec};
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::error::PlanResult;
use mppx_core::locus::Locus;
use mppx_core::path::{AggSplit, AggStrategy, Path};
use std::sync::Arc;
use tracing::trace;

pub fn add_single_mixed_dqa_hash_agg_path(
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
    if !query.group_clause.is_empty() {
        trace!("DISTINCT mixed with plain aggregates under GROUP BY is not planned");
        return Ok(());
    }

    let input = apply_projection_to_path(ctx, Arc::clone(path), Arc::clone(&info.input_proj_target));
    let distinct_locus = choose_grouping_locus(ctx, &input, &info.input_proj_target, &info.dqa_group_clause, &[])?;
    let input = if distinct_locus.need_redistribute {
        match create_motion_path(ctx, input, Vec::new(), distinct_locus.locus) {
            Some(moved) => moved,
            None => return Ok(()),
        }
    } else {
        input
    };

    let partial_groups =
        ctx.estimator
            .estimate_num_groups_on_segment(grouping.num_groups_total, input.rows, &input.locus);
    let partial = create_agg_path(
        ctx,
        input,
        Arc::clone(&grouping.partial_target),
        AggSpec::new(
            AggStrategy::Plain,
            AggSplit::InitialSerial,
            Vec::new(),
            grouping.agg_partial_costs,
            partial_groups,
        ),
    );
    let single = Locus::single_qe(ctx.config.segment_count);
    let Some(gathered) = create_motion_path(ctx, partial, Vec::new(), single) else {
        return Ok(());
    };
    let final_path = create_agg_path(
        ctx,
        gathered,
        Arc::clone(&grouping.target),
        AggSpec::new(
            AggStrategy::Plain,
            AggSplit::FinalDeserial,
            Vec::new(),
            grouping.agg_final_costs,
            grouping.num_groups_total,
        )
        .with_qual(query.having_qual.clone()),
    );
    log_candidate("mixed DISTINCT", &final_path);
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
    use mppx_core::path::{MotionType, PathKind};
    use mppx_core::query::PlannerQuery;
    use mppx_core::target::{PathTarget, SortGroupClause, TargetEntry};

    fn aggs() -> (Aggref, Aggref) {
        (
            Aggref::distinct("count", vec![col(1, "b")], DataType::Int8),
            Aggref::new("sum", vec![col(1, "c")], DataType::Int8),
        )
    }

    /// `SELECT count(DISTINCT b), sum(c) FROM r1`.
    fn fixture() -> Fixture {
        let (cd, sum) = aggs();
        let mut query = PlannerQuery::default();
        query.processed_tlist = vec![
            TargetEntry::new(Expr::Aggref(Box::new(cd)), 1),
            TargetEntry::new(Expr::Aggref(Box::new(sum)), 2),
        ];
        Fixture::new().with_query(query)
    }

    fn run(fx: &Fixture, locus: Locus) -> Vec<Arc<Path>> {
        let (cd, _) = aggs();
        let costs = AggClauseCosts {
            num_aggs: 2,
            distinct_aggrefs: vec![cd],
            ..Default::default()
        };
        let target = Arc::new(PathTarget::from_tlist(&fx.query.processed_tlist));
        let grouping = GroupingInput {
            target: Arc::clone(&target),
            partial_target: target,
            agg_costs: &costs,
            agg_partial_costs: &costs,
            agg_final_costs: &costs,
            num_groups_total: 1.0,
        };
        let mut input = PathTarget::new();
        input.add_column(col(1, "b"), 0);
        input.add_column(col(1, "c"), 1);
        let path = scan_path(&[1], locus, 1000.0, Arc::new(input));
        let ctx = fx.ctx();
        let info = fetch_single_dqa_info(&ctx, &path, &grouping).unwrap();
        let mut out: Vec<Arc<Path>> = Vec::new();
        add_single_mixed_dqa_hash_agg_path(&ctx, &path, &grouping, &info, &mut out).unwrap();
        out
    }

    #[test]
    fn test_redistributes_on_distinct_key_then_gathers() {
        let fx = fixture();
        let out = run(&fx, Locus::strewn(3));
        assert_eq!(out.len(), 1);
        let root = &out[0];
        assert_eq!(root.locus, Locus::single_qe(3));
        assert_eq!(root.rows, 1.0);

        let PathKind::Agg { subpath: gather, .. } = &root.kind else {
            panic!("expected final aggregate");
        };
        let PathKind::Motion {
            subpath: partial,
            motion: MotionType::Gather,
        } = &gather.kind
        else {
            panic!("expected gather");
        };
        let PathKind::Agg { subpath: moved, .. } = &partial.kind else {
            panic!("expected partial aggregate");
        };
        assert_eq!(moved.locus, hashed(&[col(1, "b")]));
    }

    #[test]
    fn test_collocated_input_does_not_move() {
        let fx = fixture();
        let out = run(&fx, hashed(&[col(1, "b")]));
        assert_eq!(out.len(), 1);
        let redistributes = out[0]
            .find(&|p| {
                matches!(
                    p.kind,
                    PathKind::Motion {
                        motion: MotionType::Redistribute,
                        ..
                    }
                )
            })
            .is_some();
        assert!(!redistributes);
    }

    #[test]
    fn test_group_by_abstains() {
        let mut fx = fixture();
        fx.query.processed_tlist.push(TargetEntry::new(col(1, "c"), 3).with_ref(1));
        fx.query.group_clause = vec![SortGroupClause::for_expr(1, &col(1, "c"))];
        assert!(run(&fx, Locus::strewn(3)).is_empty());
    }
}
