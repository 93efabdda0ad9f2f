//! Input preparation for single-stage aggregation.
//!
//! Bring an input path to where (and in what order) one aggregate node can group it.

use crate::grouping_locus::choose_grouping_locus;
use crate::motion::create_motion_path;
use crate::pathnode::create_sort_path;
use mppx_core::context::PlannerContext;
use mppx_core::error::PlanResult;
use mppx_core::locus::Locus;
use mppx_core::path::Path;
use mppx_core::pathkeys::PathKey;
use mppx_core::query::Rollup;
use mppx_core::target::SortGroupClause;
use std::sync::Arc;

/// Make `path` ready for sorted grouping on `group_pathkeys`.
///
/// A sorted input that has to move is gathered with its order preserved. An unsorted
/// one is redistributed first and sorted where it lands, or, when it goes to a single
/// worker anyway, sorted on the segments and merged by the gather. `None` when the
/// needed motion cannot be placed.
pub fn prepare_path_for_sorted_agg(
    ctx: &PlannerContext<'_>,
    is_sorted: bool,
    path: &Arc<Path>,
    group_pathkeys: &[PathKey],
    group_clause: &[SortGroupClause],
    rollups: &[Rollup],
) -> PlanResult<Option<Arc<Path>>> {
    let gl = choose_grouping_locus(ctx, path, &path.target, group_clause, rollups)?;
    let path = Arc::clone(path);

    if !gl.need_redistribute {
        if !is_sorted && !group_pathkeys.is_empty() {
            return Ok(Some(create_sort_path(ctx, path, group_pathkeys.to_vec())));
        }
        return Ok(Some(path));
    }

    if group_pathkeys.is_empty() {
        return Ok(create_motion_path(ctx, path, Vec::new(), gl.locus));
    }
    if is_sorted {
        let single = Locus::single_qe(ctx.config.segment_count);
        return Ok(create_motion_path(ctx, path, group_pathkeys.to_vec(), single));
    }
    if gl.locus.is_partitioned() {
        let Some(moved) = create_motion_path(ctx, path, Vec::new(), gl.locus) else {
            return Ok(None);
        };
        return Ok(Some(create_sort_path(ctx, moved, group_pathkeys.to_vec())));
    }
    let sorted = create_sort_path(ctx, path, group_pathkeys.to_vec());
    Ok(create_motion_path(ctx, sorted, group_pathkeys.to_vec(), gl.locus))
}

/// Make `path` ready for hashed grouping: only its placement matters.
pub fn prepare_path_for_hashed_agg(
    ctx: &PlannerContext<'_>,
    path: &Arc<Path>,
    group_clause: &[SortGroupClause],
    rollups: &[Rollup],
) -> PlanResult<Option<Arc<Path>>> {
    let gl = choose_grouping_locus(ctx, path, &path.target, group_clause, rollups)?;
    if !gl.need_redistribute {
        return Ok(Some(Arc::clone(path)));
    }
    Ok(create_motion_path(ctx, Arc::clone(path), Vec::new(), gl.locus))
}
