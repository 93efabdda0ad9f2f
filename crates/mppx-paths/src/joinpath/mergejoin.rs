//! Merge join and nestloop generation.
//!
//! [`sort_inner_and_outer`] builds merge joins from the cheapest inputs with explicit
//! sorts on both sides. [`match_unsorted_outer`] walks every outer path, pairing it
//! with nestloop inners and, where the outer order already drives some merge
//! clauses, with the cheapest suitably sorted inner paths.

use super::candidates::{try_mergejoin_path, try_nestloop_path, JoinTypes};
use super::mergekeys::{
    build_join_pathkeys, compare_path_costs, find_mergeclauses_for_outer_pathkeys, get_cheapest_path_for_pathkeys,
    make_inner_pathkeys_for_merge, select_outer_pathkeys_for_merge, trim_mergeclauses_for_inner_pathkeys,
    CostCriterion,
};
use super::{path_param_by_rel, JoinPathExtraData};
use crate::pathnode::{create_material_path, create_unique_path};
use mppx_core::bitmapset::Relids;
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::error::{PlanError, PlanResult};
use mppx_core::expr::JoinType;
use mppx_core::path::Path;
use mppx_core::pathkeys::PathKey;
use mppx_core::relation::RelOptInfo;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::trace;

/// Dedup joins are planned as inner joins; the de-duplication happens above them.
fn effective_jointype(jointype: JoinType) -> JoinType {
    match jointype {
        JoinType::DedupSemi | JoinType::DedupSemiReverse => JoinType::Inner,
        other => other,
    }
}

fn cheapest_total(rel: &RelOptInfo) -> PlanResult<&Arc<Path>> {
    rel.cheapest_total_path
        .as_ref()
        .ok_or_else(|| PlanError::Internal("relation without a cheapest path".into()))
}

/// Merge joins over explicitly sorted cheapest-total inputs, one per choice of
/// leading merge key.
pub fn sort_inner_and_outer(
    ctx: &PlannerContext<'_>,
    extra: &JoinPathExtraData<'_>,
    outerrel: &RelOptInfo,
    innerrel: &RelOptInfo,
    jointype: JoinType,
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    let orig = jointype;
    let mut jointype = effective_jointype(jointype);

    let mut outer_path = Arc::clone(cheapest_total(outerrel)?);
    let mut inner_path = Arc::clone(cheapest_total(innerrel)?);
    if path_param_by_rel(&outer_path, innerrel) || path_param_by_rel(&inner_path, outerrel) {
        return Ok(());
    }

    match jointype {
        JoinType::UniqueOuter => {
            let Some(unique) = create_unique_path(ctx, outer_path, extra.sjinfo_for(orig)?) else {
                return Ok(());
            };
            outer_path = unique;
            jointype = JoinType::Inner;
        }
        JoinType::UniqueInner => {
            let Some(unique) = create_unique_path(ctx, inner_path, extra.sjinfo_for(orig)?) else {
                return Ok(());
            };
            inner_path = unique;
            jointype = JoinType::Inner;
        }
        _ => {}
    }
    let types = JoinTypes { orig, jointype };

    let all_pathkeys = select_outer_pathkeys_for_merge(&extra.mergeclause_list);
    for (i, front) in all_pathkeys.iter().enumerate() {
        // Rotate each key to the front once; the first key already is.
        let outerkeys: Vec<PathKey> = if i == 0 {
            all_pathkeys.clone()
        } else {
            std::iter::once(front.clone())
                .chain(all_pathkeys.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, k)| k.clone()))
                .collect()
        };
        let cur_mergeclauses = find_mergeclauses_for_outer_pathkeys(&outerkeys, &extra.mergeclause_list);
        let innerkeys = make_inner_pathkeys_for_merge(&cur_mergeclauses, &outerkeys);
        let merge_pathkeys = build_join_pathkeys(jointype, &outerkeys);

        try_mergejoin_path(
            ctx,
            extra,
            types,
            &outer_path,
            &inner_path,
            &merge_pathkeys,
            &cur_mergeclauses,
            &outerkeys,
            &innerkeys,
            collector,
        );
    }
    Ok(())
}

/// Nestloops for every outer path, and merge joins for those outer paths whose
/// existing order can drive merge clauses.
pub fn match_unsorted_outer(
    ctx: &PlannerContext<'_>,
    extra: &JoinPathExtraData<'_>,
    outerrel: &RelOptInfo,
    innerrel: &RelOptInfo,
    jointype: JoinType,
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    let orig = jointype;
    let mut jointype = effective_jointype(jointype);

    // Right and full joins cannot be nestloops, and their merge joins must use every
    // merge clause.
    let (nestjoin_ok, useallclauses) = match jointype {
        JoinType::Right | JoinType::Full => (false, true),
        JoinType::UniqueOuter | JoinType::UniqueInner => {
            jointype = JoinType::Inner;
            (true, false)
        }
        _ => (true, false),
    };
    let types = JoinTypes { orig, jointype };

    let mut inner_cheapest_total = innerrel
        .cheapest_total_path
        .as_ref()
        .filter(|p| !path_param_by_rel(p, outerrel))
        .cloned();
    let mut matpath: Option<Arc<Path>> = None;

    if orig == JoinType::UniqueInner {
        let Some(inner) = inner_cheapest_total.take() else {
            return Ok(());
        };
        let Some(unique) = create_unique_path(ctx, inner, extra.sjinfo_for(orig)?) else {
            return Ok(());
        };
        inner_cheapest_total = Some(unique);
    } else if nestjoin_ok && ctx.config.enable_material {
        if let Some(inner) = inner_cheapest_total.as_ref().filter(|p| !p.materializes_output()) {
            matpath = Some(create_material_path(ctx, Arc::clone(inner)));
        }
    }

    let outer_paths: Vec<Arc<Path>> = if orig == JoinType::UniqueOuter {
        let cheapest = cheapest_total(outerrel)?;
        if path_param_by_rel(cheapest, innerrel) {
            return Ok(());
        }
        match create_unique_path(ctx, Arc::clone(cheapest), extra.sjinfo_for(orig)?) {
            Some(unique) => vec![unique],
            None => return Ok(()),
        }
    } else {
        outerrel
            .pathlist
            .iter()
            .filter(|p| !path_param_by_rel(p, innerrel))
            .cloned()
            .collect()
    };

    for outerpath in &outer_paths {
        let merge_pathkeys = build_join_pathkeys(jointype, &outerpath.pathkeys);

        if orig == JoinType::UniqueInner {
            if let Some(inner) = &inner_cheapest_total {
                try_nestloop_path(ctx, extra, types, outerpath, inner, &merge_pathkeys, collector);
            }
        } else if nestjoin_ok {
            for innerpath in &innerrel.cheapest_parameterized_paths {
                try_nestloop_path(ctx, extra, types, outerpath, innerpath, &merge_pathkeys, collector);
            }
            if let Some(mat) = &matpath {
                try_nestloop_path(ctx, extra, types, outerpath, mat, &merge_pathkeys, collector);
            }
        }

        // A unique-ified outer has no useful order.
        if orig == JoinType::UniqueOuter {
            continue;
        }
        let Some(inner_cheapest_total) = &inner_cheapest_total else {
            continue;
        };

        let mergeclauses = find_mergeclauses_for_outer_pathkeys(&outerpath.pathkeys, &extra.mergeclause_list);
        // A full join with no merge clauses at all is still a valid merge join.
        if mergeclauses.is_empty() && jointype != JoinType::Full {
            continue;
        }
        if useallclauses && mergeclauses.len() != extra.mergeclause_list.len() {
            continue;
        }
        if orig == JoinType::LasjNotIn {
            continue;
        }

        let innersortkeys = make_inner_pathkeys_for_merge(&mergeclauses, &outerpath.pathkeys);
        try_mergejoin_path(
            ctx,
            extra,
            types,
            outerpath,
            inner_cheapest_total,
            &merge_pathkeys,
            &mergeclauses,
            &[],
            &innersortkeys,
            collector,
        );

        // A unique-ified inner has exactly one candidate.
        if orig == JoinType::UniqueInner {
            continue;
        }

        // Look for presorted inner paths on successively shorter key prefixes, which
        // match fewer merge clauses but may avoid the sort.
        let presorted = |p: &Arc<Path>| p.is_sorted_on(&innersortkeys).then(|| Arc::clone(p));
        let mut cheapest_startup_inner = presorted(inner_cheapest_total);
        let mut cheapest_total_inner = presorted(inner_cheapest_total);
        // Presorted inners are taken from the unparameterized paths only.
        let no_params = Relids::new();
        let num_sortkeys = innersortkeys.len();

        for sortkeycnt in (1..=num_sortkeys).rev() {
            let trialsortkeys = &innersortkeys[..sortkeycnt];
            let trimmed = || {
                if sortkeycnt < num_sortkeys {
                    trim_mergeclauses_for_inner_pathkeys(&mergeclauses, trialsortkeys)
                } else {
                    mergeclauses.clone()
                }
            };

            if let Some(innerpath) =
                get_cheapest_path_for_pathkeys(&innerrel.pathlist, trialsortkeys, &no_params, CostCriterion::Total)
            {
                let better = cheapest_total_inner
                    .as_ref()
                    .map_or(true, |best| {
                        compare_path_costs(&innerpath, best, CostCriterion::Total) == Ordering::Less
                    });
                if better {
                    trace!("presorted inner on {} keys", sortkeycnt);
                    try_mergejoin_path(
                        ctx,
                        extra,
                        types,
                        outerpath,
                        &innerpath,
                        &merge_pathkeys,
                        &trimmed(),
                        &[],
                        &[],
                        collector,
                    );
                    cheapest_total_inner = Some(innerpath);
                }
            }

            if let Some(innerpath) =
                get_cheapest_path_for_pathkeys(&innerrel.pathlist, trialsortkeys, &no_params, CostCriterion::Startup)
            {
                let better = cheapest_startup_inner
                    .as_ref()
                    .map_or(true, |best| {
                        compare_path_costs(&innerpath, best, CostCriterion::Startup) == Ordering::Less
                    });
                if better {
                    let already_tried = cheapest_total_inner
                        .as_ref()
                        .is_some_and(|p| Arc::ptr_eq(p, &innerpath));
                    if !already_tried {
                        try_mergejoin_path(
                            ctx,
                            extra,
                            types,
                            outerpath,
                            &innerpath,
                            &merge_pathkeys,
                            &trimmed(),
                            &[],
                            &[],
                            collector,
                        );
                    }
                    cheapest_startup_inner = Some(innerpath);
                }
            }

            // Right and full joins need every clause; shorter prefixes are useless.
            if useallclauses {
                break;
            }
        }
    }
    Ok(())
}
