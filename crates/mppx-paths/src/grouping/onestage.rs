//! Single-stage aggregation: bring each group's rows together, then aggregate once.
//!
//! This is the baseline every multi-stage candidate has to beat. It also handles
//! everything the multi-stage planners abstain from (ordered aggregates,
//! `MultiDqaWithAgg`, already-collocated inputs).

use super::prepare::{prepare_path_for_hashed_agg, prepare_path_for_sorted_agg};
use super::{hash_table_fits, log_candidate, per_segment, GroupingInput};
use crate::pathnode::{clamp_row_est, create_agg_path, create_groupingsets_path, AggSpec};
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::error::PlanResult;
use mppx_core::path::{AggSplit, AggStrategy, Path};
use mppx_core::relation::RelOptInfo;
use std::sync::Arc;

fn groups_on(grouping: &GroupingInput<'_>, path: &Path) -> f64 {
    clamp_row_est(per_segment(grouping.num_groups_total, &path.locus))
}

pub fn create_onestage_grouping_paths(
    ctx: &PlannerContext<'_>,
    input_rel: &RelOptInfo,
    grouping: &GroupingInput<'_>,
    can_sort: bool,
    can_hash: bool,
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    let query = ctx.query;
    let group_clause = &query.group_clause;
    let Some(cheapest) = &input_rel.cheapest_total_path else {
        return Ok(());
    };

    if can_sort {
        let group_pathkeys = query.group_pathkeys()?;
        for path in &input_rel.pathlist {
            let is_sorted = path.is_sorted_on(&group_pathkeys);
            if !Arc::ptr_eq(path, cheapest) && !is_sorted {
                continue;
            }
            let Some(prepared) =
                prepare_path_for_sorted_agg(ctx, is_sorted, path, &group_pathkeys, group_clause, &query.grouping_sets)?
            else {
                continue;
            };
            let num_groups = groups_on(grouping, &prepared);
            let agg = if query.has_grouping_sets() {
                create_groupingsets_path(
                    ctx,
                    prepared,
                    Arc::clone(&grouping.target),
                    query.grouping_sets.clone(),
                    AggSplit::Simple,
                    grouping.agg_costs,
                    num_groups,
                )
            } else {
                let strategy = if group_clause.is_empty() {
                    AggStrategy::Plain
                } else {
                    AggStrategy::Sorted
                };
                let spec = AggSpec::new(strategy, AggSplit::Simple, group_clause.clone(), grouping.agg_costs, num_groups)
                    .with_qual(query.having_qual.clone());
                create_agg_path(ctx, prepared, Arc::clone(&grouping.target), spec)
            };
            log_candidate("one-stage sorted", &agg);
            collector.add_path(agg);
        }
    }

    if can_hash && !group_clause.is_empty() && !query.has_grouping_sets() {
        let Some(prepared) = prepare_path_for_hashed_agg(ctx, cheapest, group_clause, &[])? else {
            return Ok(());
        };
        let num_groups = groups_on(grouping, &prepared);
        if hash_table_fits(ctx, num_groups, prepared.target.width).is_none() {
            return Ok(());
        }
        let spec = AggSpec::new(
            AggStrategy::Hashed,
            AggSplit::Simple,
            group_clause.clone(),
            grouping.agg_costs,
            num_groups,
        )
        .with_qual(query.having_qual.clone());
        let agg = create_agg_path(ctx, prepared, Arc::clone(&grouping.target), spec);
        log_candidate("one-stage hashed", &agg);
        collector.add_path(agg);
    }
    Ok(())
}
