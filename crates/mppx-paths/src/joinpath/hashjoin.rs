//! Hash join generation.

use super::candidates::{try_hashjoin_path, JoinTypes};
use super::clauses::select_hash_clauses;
use super::{path_param_by_rel, JoinPathExtraData};
use crate::pathnode::create_unique_path;
use mppx_core::collector::PathCollector;
use mppx_core::context::PlannerContext;
use mppx_core::error::{PlanError, PlanResult};
use mppx_core::expr::JoinType;
use mppx_core::relation::RelOptInfo;
use std::sync::Arc;
use tracing::trace;

/// Hash joins over the cheapest inputs of both sides, building the hash table on the
/// inner side. Only the inner side's order is irrelevant here, so the outer's
/// cheapest-startup path is worth a separate try.
pub fn hash_inner_and_outer(
    ctx: &PlannerContext<'_>,
    extra: &JoinPathExtraData<'_>,
    outerrel: &RelOptInfo,
    innerrel: &RelOptInfo,
    jointype: JoinType,
    collector: &mut dyn PathCollector,
) -> PlanResult<()> {
    let orig = jointype;
    let jointype = match jointype {
        JoinType::DedupSemi | JoinType::DedupSemiReverse => JoinType::Inner,
        other => other,
    };

    let hashclauses = select_hash_clauses(outerrel, innerrel, extra.restrictlist, jointype);
    if hashclauses.is_empty() {
        trace!("no hash clauses for {:?} join", orig);
        return Ok(());
    }

    let (Some(cheapest_total_outer), Some(cheapest_total_inner)) =
        (&outerrel.cheapest_total_path, &innerrel.cheapest_total_path)
    else {
        return Err(PlanError::Internal("relation without a cheapest path".into()));
    };
    if path_param_by_rel(cheapest_total_outer, innerrel) || path_param_by_rel(cheapest_total_inner, outerrel) {
        return Ok(());
    }
    let cheapest_startup_outer = outerrel
        .cheapest_startup_path
        .as_ref()
        .filter(|p| !path_param_by_rel(p, innerrel));

    match jointype {
        JoinType::UniqueOuter => {
            let types = JoinTypes {
                orig,
                jointype: JoinType::Inner,
            };
            if let Some(outer) = create_unique_path(ctx, Arc::clone(cheapest_total_outer), extra.sjinfo_for(orig)?) {
                try_hashjoin_path(ctx, extra, types, &outer, cheapest_total_inner, &hashclauses, collector);
            }
        }
        JoinType::UniqueInner => {
            let types = JoinTypes {
                orig,
                jointype: JoinType::Inner,
            };
            let Some(inner) = create_unique_path(ctx, Arc::clone(cheapest_total_inner), extra.sjinfo_for(orig)?)
            else {
                return Ok(());
            };
            try_hashjoin_path(ctx, extra, types, cheapest_total_outer, &inner, &hashclauses, collector);
            if let Some(startup) = cheapest_startup_outer.filter(|p| !Arc::ptr_eq(*p, cheapest_total_outer)) {
                try_hashjoin_path(ctx, extra, types, startup, &inner, &hashclauses, collector);
            }
        }
        _ => {
            let types = JoinTypes { orig, jointype };
            if let Some(startup) = cheapest_startup_outer {
                try_hashjoin_path(ctx, extra, types, startup, cheapest_total_inner, &hashclauses, collector);
            }

            for outer in &outerrel.cheapest_parameterized_paths {
                if path_param_by_rel(outer, innerrel) {
                    continue;
                }
                for inner in &innerrel.cheapest_parameterized_paths {
                    if path_param_by_rel(inner, outerrel) {
                        continue;
                    }
                    let tried = cheapest_startup_outer
                        .is_some_and(|s| Arc::ptr_eq(s, outer) && Arc::ptr_eq(inner, cheapest_total_inner));
                    if tried {
                        continue;
                    }
                    try_hashjoin_path(ctx, extra, types, outer, inner, &hashclauses, collector);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joinpath::clauses::select_redistribution_clauses;
    use crate::test_support::*;
    use mppx_core::bitmapset::Relids;
    use mppx_core::expr::{DataType, Expr};
    use mppx_core::locus::Locus;
    use mppx_core::path::{MotionType, Path, PathKind};
    use mppx_core::query::SpecialJoinInfo;
    use mppx_core::relation::RestrictInfo;

    fn rel(relid: usize, paths: Vec<Path>) -> RelOptInfo {
        RelOptInfo::with_paths(Relids::singleton(relid), 300.0, paths)
    }

    fn scan(relid: usize, locus: Locus, total: f64) -> Path {
        Path::scan(Relids::singleton(relid), locus, 100.0, total, target_of(&[col(relid, "k")]))
    }

    fn run(
        outer: &RelOptInfo,
        inner: &RelOptInfo,
        clause: Expr,
        jointype: JoinType,
        sjinfo: Option<&SpecialJoinInfo>,
    ) -> PlanResult<Vec<Arc<Path>>> {
        let fx = Fixture::new();
        let joinrel = RelOptInfo::new(outer.relids.union(&inner.relids), 300.0);
        let restrictlist = vec![Arc::new(RestrictInfo::new(clause, false))];
        let extra = JoinPathExtraData {
            joinrel: &joinrel,
            restrictlist: &restrictlist,
            mergeclause_list: Vec::new(),
            redistribution_clauses: select_redistribution_clauses(outer, inner, &restrictlist, jointype),
            sjinfo,
            param_source_rels: Relids::new(),
        };
        let mut out: Vec<Arc<Path>> = Vec::new();
        hash_inner_and_outer(&fx.ctx(), &extra, outer, inner, jointype, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_hash_join_redistributes_inner() {
        let outer = rel(1, vec![scan(1, hashed(&[col(1, "k")]), 100.0)]);
        let inner = rel(2, vec![scan(2, Locus::strewn(3), 100.0)]);
        let out = run(&outer, &inner, Expr::eq_op(col(1, "k"), col(2, "k")), JoinType::Inner, None).unwrap();

        assert_eq!(out.len(), 1);
        let PathKind::HashJoin { join, hashclauses } = &out[0].kind else {
            panic!("expected hash join");
        };
        assert_eq!(hashclauses.len(), 1);
        assert!(matches!(
            join.inner.kind,
            PathKind::Motion {
                motion: MotionType::Redistribute,
                ..
            }
        ));
        assert_eq!(join.inner.locus, hashed(&[col(2, "k")]));
        assert_eq!(out[0].locus, hashed(&[col(1, "k")]));
        assert!(out[0].pathkeys.is_empty());
        assert_eq!(out[0].rows, 100.0);
    }

    #[test]
    fn test_no_hash_clause_no_paths() {
        let outer = rel(1, vec![scan(1, Locus::strewn(3), 100.0)]);
        let inner = rel(2, vec![scan(2, Locus::strewn(3), 100.0)]);
        let lt = Expr::BinaryOp {
            op: mppx_core::expr::BinaryOp::Lt,
            left: Box::new(col(1, "k")),
            right: Box::new(col(2, "k")),
        };
        assert!(run(&outer, &inner, lt, JoinType::Inner, None).unwrap().is_empty());

        let p = |r| Expr::column(r, "p", 0, DataType::Point);
        assert!(run(&outer, &inner, Expr::eq_op(p(1), p(2)), JoinType::Inner, None).unwrap().is_empty());
    }

    #[test]
    fn test_startup_outer_tried_separately() {
        let fast_start = scan(1, hashed(&[col(1, "k")]), 150.0).with_startup_cost(0.0);
        let mut slow_start = scan(1, hashed(&[col(1, "k")]), 100.0);
        slow_start.startup_cost = 50.0;
        let outer = rel(1, vec![fast_start, slow_start]);
        let inner = rel(2, vec![scan(2, hashed(&[col(2, "k")]), 100.0)]);

        let out = run(&outer, &inner, Expr::eq_op(col(1, "k"), col(2, "k")), JoinType::Inner, None).unwrap();
        // (startup outer, total inner) plus (total outer, total inner).
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_unique_inner_requires_sjinfo() {
        let outer = rel(1, vec![scan(1, Locus::strewn(3), 100.0)]);
        let inner = rel(2, vec![scan(2, Locus::strewn(3), 100.0)]);
        let err = run(&outer, &inner, Expr::eq_op(col(1, "k"), col(2, "k")), JoinType::UniqueInner, None).unwrap_err();
        assert_eq!(err, PlanError::MissingSpecialJoinInfo(JoinType::UniqueInner));
    }

    #[test]
    fn test_dedup_semi_keeps_jointype() {
        let outer = rel(1, vec![scan(1, hashed(&[col(1, "k")]), 100.0)]);
        let inner = rel(2, vec![scan(2, hashed(&[col(2, "k")]), 100.0)]);
        let out = run(&outer, &inner, Expr::eq_op(col(1, "k"), col(2, "k")), JoinType::DedupSemi, None).unwrap();
        assert_eq!(out.len(), 1);
        let PathKind::HashJoin { join, .. } = &out[0].kind else {
            panic!("expected hash join");
        };
        assert_eq!(join.jointype, JoinType::DedupSemi);
    }
}
