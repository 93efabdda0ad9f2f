//! # Motions
//!
//! A motion moves an intermediate result between segments. It is the only path node
//! that changes a locus, and the only one that cannot sit above a parameterized path:
//! the parameter values come from an enclosing nestloop on the receiving side, so the
//! sending side would have nothing to evaluate with.
//!
//! ## Row Accounting
//!
//! | Motion       | Output locus       | Output rows                 |
//! |--------------|--------------------|-----------------------------|
//! | Gather       | `Entry`/`SingleQE` | input rows over all segments |
//! | Redistribute | `Hashed`/`Strewn`  | total rows / target segments |
//! | Broadcast    | `Replicated`       | total rows, on every segment |
//!
//! Only a gather can preserve order (by merging sorted streams), and only when asked.
//!
//! ## Joins
//!
//! [`plan_join_motions`] decides which side(s) of a join to move so that matching
//! rows meet. It prefers no motion, then moving one side onto the other's hash keys,
//! then redistributing both on the join keys. Without usable join keys it broadcasts
//! whichever side the join type allows, and gathers both sides as a last resort.

use crate::pathnode::clamp_row_est;
use mppx_core::context::PlannerContext;
use mppx_core::expr::{Expr, JoinType};
use mppx_core::locus::Locus;
use mppx_core::path::{MotionType, Path, PathKind};
use mppx_core::pathkeys::PathKey;
use mppx_core::relation::JoinClause;
use std::sync::Arc;
use tracing::trace;

/// Move `subpath` to `locus`. Returns the input unchanged when it already has that
/// locus (or `locus` is `Null`), and `None` when a motion is needed above a
/// parameterized path.
pub fn create_motion_path(
    ctx: &PlannerContext<'_>,
    subpath: Arc<Path>,
    pathkeys: Vec<PathKey>,
    locus: Locus,
) -> Option<Arc<Path>> {
    if locus.is_null() || locus == subpath.locus {
        return Some(subpath);
    }
    if subpath.is_parameterized() {
        trace!("no motion to {:?} above a parameterized path", locus);
        return None;
    }

    let total_rows = subpath.total_rows();
    let (motion, rows) = match &locus {
        Locus::Entry | Locus::SingleQE { .. } => (MotionType::Gather, total_rows),
        Locus::Hashed { numsegments, .. } | Locus::Strewn { numsegments } => {
            (MotionType::Redistribute, total_rows / (*numsegments).max(1) as f64)
        }
        Locus::Replicated { .. } => (MotionType::Broadcast, total_rows),
        Locus::Null => return Some(subpath),
    };
    let pathkeys = if motion == MotionType::Gather && subpath.is_sorted_on(&pathkeys) {
        pathkeys
    } else {
        Vec::new()
    };

    let cost = ctx.cost_model.cost_motion(&subpath, motion, locus.num_segments());
    Some(Arc::new(Path {
        parent: subpath.parent.clone(),
        locus,
        rows: clamp_row_est(rows),
        startup_cost: cost.startup,
        total_cost: cost.total,
        pathkeys,
        target: Arc::clone(&subpath.target),
        required_outer: subpath.required_outer.clone(),
        kind: PathKind::Motion { subpath, motion },
    }))
}

/// Join inputs after motions, and the locus of the join's output.
#[derive(Debug, Clone)]
pub struct JoinMotions {
    pub outer: Arc<Path>,
    pub inner: Arc<Path>,
    pub locus: Locus,
}

impl JoinMotions {
    pub fn outer_moved(&self, original: &Arc<Path>) -> bool {
        !Arc::ptr_eq(&self.outer, original)
    }

    pub fn inner_moved(&self, original: &Arc<Path>) -> bool {
        !Arc::ptr_eq(&self.inner, original)
    }
}

/// Whether every outer row can be joined against a full copy of the inner side on
/// its own segment without losing or duplicating output rows.
fn can_replicate_inner(jointype: JoinType) -> bool {
    matches!(
        jointype,
        JoinType::Inner
            | JoinType::Left
            | JoinType::Semi
            | JoinType::Anti
            | JoinType::LasjNotIn
            | JoinType::UniqueOuter
            | JoinType::UniqueInner
            | JoinType::DedupSemi
    )
}

fn can_replicate_outer(jointype: JoinType) -> bool {
    matches!(
        jointype,
        JoinType::Inner | JoinType::Right | JoinType::UniqueOuter | JoinType::UniqueInner | JoinType::DedupSemiReverse
    )
}

/// Output locus of a join whose inputs are collocated on `outer` / `inner`.
fn collocated_join_locus(jointype: JoinType, outer: &Locus, inner: &Locus) -> Locus {
    match jointype {
        // Null-extended rows from either side break any hash placement.
        JoinType::Full => Locus::strewn(outer.num_segments().max(1)),
        JoinType::Right => inner.clone(),
        _ => outer.clone(),
    }
}

/// For each key of `locus`, the expression on the other side of a join clause whose
/// `side` operand is that key. `None` unless every key has a partner.
fn partner_exprs(locus: &Locus, pairs: &[(Expr, Expr)], outer_side: bool) -> Option<Vec<Expr>> {
    if !locus.is_hashed() {
        return None;
    }
    locus
        .keys()
        .iter()
        .map(|key| {
            pairs.iter().find_map(|(o, i)| {
                let (mine, other) = if outer_side { (o, i) } else { (i, o) };
                (*mine == key.expr && mine.data_type().distribution_opfamily() == Some(key.opfamily))
                    .then(|| other.clone())
            })
        })
        .collect()
}

fn is_collocated(outer: &Locus, inner: &Locus, pairs: &[(Expr, Expr)]) -> bool {
    if !outer.is_hashed() || !inner.is_hashed() || outer.num_segments() != inner.num_segments() {
        return false;
    }
    let (ok, ik) = (outer.keys(), inner.keys());
    ok.len() == ik.len()
        && ok.iter().zip(ik).all(|(o, i)| {
            o.opfamily == i.opfamily && pairs.iter().any(|(po, pi)| *po == o.expr && *pi == i.expr)
        })
}

/// Decide the motions a join between `outer` and `inner` needs. `None` means the
/// join cannot be placed with these inputs (a parameterized side would have to move).
pub fn plan_join_motions(
    ctx: &PlannerContext<'_>,
    jointype: JoinType,
    outer: &Arc<Path>,
    inner: &Arc<Path>,
    redistribution_clauses: &[JoinClause],
) -> Option<JoinMotions> {
    let (ol, il) = (&outer.locus, &inner.locus);
    let numsegments = ctx.config.segment_count;

    let moved = |outer_locus: Option<Locus>, inner_locus: Option<Locus>, locus: Locus| -> Option<JoinMotions> {
        let outer = match outer_locus {
            Some(l) => create_motion_path(ctx, Arc::clone(outer), Vec::new(), l)?,
            None => Arc::clone(outer),
        };
        let inner = match inner_locus {
            Some(l) => create_motion_path(ctx, Arc::clone(inner), Vec::new(), l)?,
            None => Arc::clone(inner),
        };
        Some(JoinMotions { outer, inner, locus })
    };
    let gather_both = || {
        let single = Locus::single_qe(numsegments);
        moved(Some(single.clone()), Some(single.clone()), single)
    };

    if ol.is_bottleneck() || il.is_bottleneck() {
        let target = if *ol == Locus::Entry || *il == Locus::Entry {
            Locus::Entry
        } else if ol.is_bottleneck() {
            ol.clone()
        } else {
            il.clone()
        };
        // A replicated side is already complete next to a single worker.
        let needs = |l: &Locus| (*l != target && !(l.is_replicated() && target != Locus::Entry)).then(|| target.clone());
        return moved(needs(ol), needs(il), target);
    }

    match (ol.is_replicated(), il.is_replicated()) {
        (true, true) => return moved(None, None, ol.clone()),
        (false, true) if can_replicate_inner(jointype) => return moved(None, None, ol.clone()),
        (true, false) if can_replicate_outer(jointype) => return moved(None, None, il.clone()),
        (false, true) | (true, false) => return gather_both(),
        (false, false) => {}
    }

    let pairs: Vec<(Expr, Expr)> = redistribution_clauses
        .iter()
        .filter_map(|c| Some((c.outer_expr()?.clone(), c.inner_expr()?.clone())))
        .collect();

    if !pairs.is_empty() {
        if is_collocated(ol, il, &pairs) {
            return moved(None, None, collocated_join_locus(jointype, ol, il));
        }
        if let Some(new_il) = partner_exprs(ol, &pairs, true).and_then(|e| Locus::from_exprs(&e, ol.num_segments())) {
            let locus = collocated_join_locus(jointype, ol, &new_il);
            return moved(None, Some(new_il), locus);
        }
        if let Some(new_ol) = partner_exprs(il, &pairs, false).and_then(|e| Locus::from_exprs(&e, il.num_segments())) {
            let locus = collocated_join_locus(jointype, &new_ol, il);
            return moved(Some(new_ol), None, locus);
        }
        let (outer_exprs, inner_exprs): (Vec<Expr>, Vec<Expr>) = pairs.into_iter().unzip();
        if let (Some(new_ol), Some(new_il)) = (
            Locus::from_exprs(&outer_exprs, numsegments),
            Locus::from_exprs(&inner_exprs, numsegments),
        ) {
            let locus = collocated_join_locus(jointype, &new_ol, &new_il);
            return moved(Some(new_ol), Some(new_il), locus);
        }
    }

    if can_replicate_inner(jointype) {
        return moved(None, Some(Locus::replicated(ol.num_segments())), ol.clone());
    }
    if can_replicate_outer(jointype) {
        return moved(Some(Locus::replicated(il.num_segments())), None, il.clone());
    }
    gather_both()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use mppx_core::bitmapset::Relids;
    use mppx_core::relation::RestrictInfo;

    fn clause(outer: Expr, inner: Expr) -> JoinClause {
        JoinClause {
            rinfo: Arc::new(RestrictInfo::new(Expr::eq_op(outer, inner), true)),
            outer_is_left: true,
        }
    }

    #[test]
    fn test_gather_collects_all_segments() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let a = col(1, "a");
        let keys = vec![PathKey::asc(a.clone())];
        let sorted = Arc::new((*scan_path(&[1], Locus::strewn(3), 100.0, int_target(&["a"]))).clone().with_pathkeys(keys.clone()));

        let gathered = create_motion_path(&ctx, Arc::clone(&sorted), keys.clone(), Locus::single_qe(3)).unwrap();
        assert_eq!(gathered.rows, 300.0);
        assert_eq!(gathered.pathkeys, keys);
        assert!(matches!(gathered.kind, PathKind::Motion { motion: MotionType::Gather, .. }));

        let redistributed = create_motion_path(&ctx, sorted, keys, hashed(&[a])).unwrap();
        assert_eq!(redistributed.rows, 100.0);
        assert!(redistributed.pathkeys.is_empty());
    }

    #[test]
    fn test_no_motion_above_parameterized_path() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let param = Arc::new(
            (*scan_path(&[2], Locus::strewn(3), 10.0, int_target(&["a"]))).clone().with_required_outer(Relids::singleton(1)),
        );
        assert!(create_motion_path(&ctx, Arc::clone(&param), vec![], Locus::single_qe(3)).is_none());
        // Staying put is always fine.
        let same = create_motion_path(&ctx, Arc::clone(&param), vec![], param.locus.clone()).unwrap();
        assert!(Arc::ptr_eq(&same, &param));
    }

    #[test]
    fn test_collocated_join_needs_no_motion() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let (a, b) = (col(1, "a"), col(2, "b"));
        let outer = scan_path(&[1], hashed(&[a.clone()]), 100.0, target_of(&[a.clone()]));
        let inner = scan_path(&[2], hashed(&[b.clone()]), 100.0, target_of(&[b.clone()]));

        let plan = plan_join_motions(&ctx, JoinType::Inner, &outer, &inner, &[clause(a, b)]).unwrap();
        assert!(!plan.outer_moved(&outer));
        assert!(!plan.inner_moved(&inner));
        assert_eq!(plan.locus, outer.locus);
    }

    #[test]
    fn test_inner_moves_onto_outer_keys() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let (a, b) = (col(1, "a"), col(2, "b"));
        let outer = scan_path(&[1], hashed(&[a.clone()]), 100.0, target_of(&[a.clone()]));
        let inner = scan_path(&[2], Locus::strewn(3), 100.0, target_of(&[b.clone()]));

        let plan = plan_join_motions(&ctx, JoinType::Inner, &outer, &inner, &[clause(a, b.clone())]).unwrap();
        assert!(!plan.outer_moved(&outer));
        assert_eq!(plan.inner.locus, hashed(&[b]));
    }

    #[test]
    fn test_full_join_without_keys_gathers() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let outer = scan_path(&[1], Locus::strewn(3), 100.0, int_target(&["a"]));
        let inner = scan_path(&[2], Locus::strewn(3), 100.0, int_target(&["b"]));

        let plan = plan_join_motions(&ctx, JoinType::Full, &outer, &inner, &[]).unwrap();
        assert_eq!(plan.locus, Locus::single_qe(3));
        assert!(plan.outer_moved(&outer) && plan.inner_moved(&inner));

        let plan = plan_join_motions(&ctx, JoinType::Left, &outer, &inner, &[]).unwrap();
        assert_eq!(plan.inner.locus, Locus::replicated(3));
        assert_eq!(plan.locus, outer.locus);
    }

    #[test]
    fn test_bottleneck_side_pulls_other_side() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let outer = scan_path(&[1], Locus::single_qe(3), 100.0, int_target(&["a"]));
        let inner = scan_path(&[2], Locus::strewn(3), 100.0, int_target(&["b"]));

        let plan = plan_join_motions(&ctx, JoinType::Inner, &outer, &inner, &[]).unwrap();
        assert_eq!(plan.locus, Locus::single_qe(3));
        assert!(!plan.outer_moved(&outer));
        assert_eq!(plan.inner.rows, 300.0);
    }
}
