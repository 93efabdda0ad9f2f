//! # Grouping and Aggregation Paths
//!
//! Multi-stage aggregation for a partitioned input: aggregate what each segment has,
//! move the partial results so that every group's rows meet, then combine them.
//!
//! ## Entry Points
//!
//! - [`create_twostage_grouping_paths`] adds every multi-stage candidate that applies.
//! - [`onestage::create_onestage_grouping_paths`] adds the single-stage baseline the
//!   multi-stage candidates compete with.
//!
//! ## Strategies
//!
//! | Aggregates | Strategy | Module |
//! |------------|----------|--------|
//! | no DISTINCT | sorted partial → gather → sorted final | [`twostage`] |
//! | no DISTINCT | hashed partial → redistribute → hashed final | [`twostage`] |
//! | one DISTINCT shape | de-duplicate, then aggregate | [`single_dqa`] |
//! | one DISTINCT shape plus plain aggregates, no GROUP BY | redistribute on the DISTINCT key | [`mixed_dqa`] |
//! | several DISTINCT shapes | tuple split, then de-duplicate per shape | [`multi_dqa`] |
//!
//! Each strategy either submits one candidate or abstains. Abstaining is not an
//! error; it only means the strategy has nothing useful to offer for this input.

pub mod dqa;
pub mod mixed_dqa;
pub mod multi_dqa;
pub mod onestage;
pub mod prepare;
pub mod single_dqa;
pub mod twostage;

use dqa::{recognize_dqa_type, DqaType};
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::cost::{AggClauseCosts, HashAggTableSizes};
use mppx_core::error::PlanResult;
use mppx_core::locus::Locus;
use mppx_core::path::Path;
use mppx_core::relation::RelOptInfo;
use mppx_core::target::PathTarget;
use std::sync::Arc;
use tracing::{debug, trace};

/// Inputs shared by the grouping strategies of one query level.
#[derive(Debug, Clone)]
pub struct GroupingInput<'a> {
    /// Output of the final aggregation.
    pub target: Arc<PathTarget>,
    /// Output of the partial aggregation: grouping columns plus transition states.
    pub partial_target: Arc<PathTarget>,
    pub agg_costs: &'a AggClauseCosts,
    pub agg_partial_costs: &'a AggClauseCosts,
    pub agg_final_costs: &'a AggClauseCosts,
    /// Estimated groups over the whole input.
    pub num_groups_total: f64,
}

/// Size the hash table for `num_groups` entries of `width` bytes, or `None` if it
/// would not fit in the per-operator memory budget.
pub(crate) fn hash_table_fits(ctx: &PlannerContext<'_>, num_groups: f64, width: u32) -> Option<HashAggTableSizes> {
    let sizes = ctx
        .sizer
        .calc_hash_agg_table_sizes(ctx.config.work_mem_bytes(), num_groups, width);
    if sizes.is_none() {
        trace!("hash table for {} groups exceeds work_mem", num_groups);
    }
    sizes
}

/// Per-segment share of `total` on `locus`, or all of it on a single worker.
pub(crate) fn per_segment(total: f64, locus: &Locus) -> f64 {
    if locus.is_partitioned() {
        total / locus.num_segments().max(1) as f64
    } else {
        total
    }
}

pub(crate) fn log_candidate(strategy: &str, path: &Path) {
    debug!(
        "{} candidate: locus={:?} rows={:.0} cost={:.2}",
        strategy, path.locus, path.rows, path.total_cost
    );
}

/// Add the multi-stage aggregation candidates for `input_rel`.
///
/// `can_sort` and `can_hash` say whether the grouping clause supports sorted and
/// hashed grouping. Candidates are built on the cheapest input path; sorted
/// candidates are also built on every input path already in grouping order.
pub fn create_twostage_grouping_paths(
    ctx: &PlannerContext<'_>,
    input_rel: &RelOptInfo,
    grouping: &GroupingInput<'_>,
    can_sort: bool,
    can_hash: bool,
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    if !ctx.config.enable_multiphase_agg {
        return Ok(());
    }
    // Ordered aggregates see their input in one sorted stream.
    if grouping.agg_costs.num_ordered_aggs > 0 {
        trace!("ordered aggregates; no multi-stage aggregation");
        return Ok(());
    }
    let Some(cheapest) = &input_rel.cheapest_total_path else {
        return Ok(());
    };
    // A gathered intermediate result is not scattered again.
    if !cheapest.locus.is_partitioned() {
        trace!("input is not partitioned; no multi-stage aggregation");
        return Ok(());
    }

    let query = ctx.query;
    let has_distinct = grouping.agg_costs.has_distinct();
    let dqa_type = if has_distinct {
        recognize_dqa_type(grouping)
    } else {
        DqaType::Invalid
    };

    if can_sort {
        let group_pathkeys = query.group_pathkeys()?;
        for path in &input_rel.pathlist {
            let is_sorted = path.is_sorted_on(&group_pathkeys);
            if Arc::ptr_eq(path, cheapest) || is_sorted {
                twostage::add_twostage_group_agg_path(ctx, path, is_sorted, grouping, dqa_type, collector)?;
            }
        }
    }

    if can_hash && !has_distinct {
        twostage::add_twostage_hash_agg_path(ctx, cheapest, grouping, collector)?;
    }

    if (can_hash || query.group_clause.is_empty()) && has_distinct {
        debug!("DISTINCT aggregates classified as {:?}", dqa_type);
        match dqa_type {
            DqaType::SingleDqa => {
                let info = dqa::fetch_single_dqa_info(ctx, cheapest, grouping)?;
                single_dqa::add_single_dqa_hash_agg_path(ctx, cheapest, grouping, &info, collector)?;
            }
            DqaType::SingleDqaWithAgg => {
                let info = dqa::fetch_single_dqa_info(ctx, cheapest, grouping)?;
                mixed_dqa::add_single_mixed_dqa_hash_agg_path(ctx, cheapest, grouping, &info, collector)?;
            }
            DqaType::MultiDqa => {
                let info = dqa::fetch_multi_dqas_info(ctx, cheapest, grouping)?;
                multi_dqa::add_multi_dqas_hash_agg_path(ctx, cheapest, grouping, &info, collector)?;
            }
            DqaType::MultiDqaWithAgg | DqaType::Invalid => {}
        }
    }
    Ok(())
}
