//! Selection of the join clauses each join method can use for one (outer, inner)
//! pair. All three selectors skip clauses that another join pushed down into an
//! outer join, since those are evaluated as filters above it.

use mppx_core::expr::{Expr, JoinType};
use mppx_core::relation::{JoinClause, RelOptInfo, RestrictInfo};
use std::sync::Arc;

/// Orient `rinfo` for this join: `Some(true)` if its left operand reads only the
/// outer relation and its right operand only the inner one, `Some(false)` for the
/// mirror image, `None` if the operands mix sides.
pub fn clause_sides_match_join(rinfo: &RestrictInfo, outerrel: &RelOptInfo, innerrel: &RelOptInfo) -> Option<bool> {
    if rinfo.left_relids.is_subset(&outerrel.relids) && rinfo.right_relids.is_subset(&innerrel.relids) {
        Some(true)
    } else if rinfo.left_relids.is_subset(&innerrel.relids) && rinfo.right_relids.is_subset(&outerrel.relids) {
        Some(false)
    } else {
        None
    }
}

fn oriented(rinfo: &Arc<RestrictInfo>, outerrel: &RelOptInfo, innerrel: &RelOptInfo) -> Option<JoinClause> {
    clause_sides_match_join(rinfo, outerrel, innerrel).map(|outer_is_left| JoinClause {
        rinfo: Arc::clone(rinfo),
        outer_is_left,
    })
}

/// Merge-joinable clauses for this pair, and whether a merge join is allowed at all.
///
/// Right and full merge joins cannot evaluate extra join conditions other than
/// constants, so any other non-mergeable clause disallows them. Note that an empty
/// clause list can still allow a merge join: `FULL JOIN ... ON true` has no other
/// implementation.
pub fn select_mergejoin_clauses(
    outerrel: &RelOptInfo,
    innerrel: &RelOptInfo,
    restrictlist: &[Arc<RestrictInfo>],
    jointype: JoinType,
) -> (Vec<JoinClause>, bool) {
    let is_outer_join = jointype.is_outer();
    let mut have_nonmergeable = false;
    let mut result = Vec::new();

    for rinfo in restrictlist {
        if is_outer_join && rinfo.is_pushed_down {
            continue;
        }
        if !rinfo.can_join || !rinfo.mergejoinable {
            if !matches!(rinfo.clause, Expr::Literal(_)) {
                have_nonmergeable = true;
            }
            continue;
        }
        match oriented(rinfo, outerrel, innerrel) {
            Some(clause) => result.push(clause),
            None => have_nonmergeable = true,
        }
    }

    let allowed = match jointype {
        JoinType::Right | JoinType::Full => !have_nonmergeable,
        _ => true,
    };
    (result, allowed)
}

/// Equality clauses along which both sides can be redistributed: merge-joinable,
/// with operands that hash in the same operator family. Always a subset of the
/// merge clauses.
pub fn select_redistribution_clauses(
    outerrel: &RelOptInfo,
    innerrel: &RelOptInfo,
    restrictlist: &[Arc<RestrictInfo>],
    jointype: JoinType,
) -> Vec<JoinClause> {
    let is_outer_join = jointype.is_outer();
    restrictlist
        .iter()
        .filter(|rinfo| !(is_outer_join && rinfo.is_pushed_down))
        .filter(|rinfo| rinfo.is_redistributable() && rinfo.can_join && rinfo.mergejoinable)
        .filter_map(|rinfo| oriented(rinfo, outerrel, innerrel))
        .collect()
}

/// Hash-joinable clauses for this pair. `(a = b) IS NOT FALSE` hashes like `a = b`
/// but is only correct under the `NOT IN` anti join's null handling.
pub fn select_hash_clauses(
    outerrel: &RelOptInfo,
    innerrel: &RelOptInfo,
    restrictlist: &[Arc<RestrictInfo>],
    jointype: JoinType,
) -> Vec<JoinClause> {
    let is_outer_join = jointype.is_outer();
    restrictlist
        .iter()
        .filter(|rinfo| jointype == JoinType::LasjNotIn || !rinfo.is_bool_test())
        .filter(|rinfo| !(is_outer_join && rinfo.is_pushed_down))
        .filter(|rinfo| rinfo.can_join && rinfo.hashjoinable)
        .filter_map(|rinfo| oriented(rinfo, outerrel, innerrel))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::col;
    use mppx_core::bitmapset::Relids;
    use mppx_core::expr::{BoolTestType, DataType, ScalarValue};

    fn rels() -> (RelOptInfo, RelOptInfo) {
        (
            RelOptInfo::new(Relids::singleton(1), 10.0),
            RelOptInfo::new(Relids::singleton(2), 10.0),
        )
    }

    fn rinfo(clause: Expr, pushed_down: bool) -> Arc<RestrictInfo> {
        Arc::new(RestrictInfo::new(clause, pushed_down))
    }

    #[test]
    fn test_orientation_follows_operands() {
        let (outer, inner) = rels();
        let forward = RestrictInfo::new(Expr::eq_op(col(1, "a"), col(2, "b")), false);
        let backward = RestrictInfo::new(Expr::eq_op(col(2, "b"), col(1, "a")), false);
        assert_eq!(clause_sides_match_join(&forward, &outer, &inner), Some(true));
        assert_eq!(clause_sides_match_join(&backward, &outer, &inner), Some(false));
        assert_eq!(clause_sides_match_join(&forward, &inner, &inner), None);
    }

    #[test]
    fn test_full_join_with_nonmergeable_clause_disallows_merge() {
        let (outer, inner) = rels();
        let p = |r| Expr::column(r, "p", 0, DataType::Point);
        let list = vec![rinfo(Expr::eq_op(col(1, "a"), col(2, "b")), false), rinfo(Expr::eq_op(p(1), p(2)), false)];

        let (clauses, allowed) = select_mergejoin_clauses(&outer, &inner, &list, JoinType::Full);
        assert_eq!(clauses.len(), 1);
        assert!(!allowed);

        let (_, allowed) = select_mergejoin_clauses(&outer, &inner, &list, JoinType::Inner);
        assert!(allowed);

        // A constant join condition is fine.
        let on_true = vec![rinfo(Expr::Literal(ScalarValue::Bool(true)), false)];
        let (clauses, allowed) = select_mergejoin_clauses(&outer, &inner, &on_true, JoinType::Full);
        assert!(clauses.is_empty());
        assert!(allowed);
    }

    #[test]
    fn test_pushed_down_clause_ignored_for_outer_join() {
        let (outer, inner) = rels();
        let list = vec![rinfo(Expr::eq_op(col(1, "a"), col(2, "b")), true)];
        assert!(select_redistribution_clauses(&outer, &inner, &list, JoinType::Left).is_empty());
        assert_eq!(select_redistribution_clauses(&outer, &inner, &list, JoinType::Inner).len(), 1);
    }

    #[test]
    fn test_not_in_clause_hashes_only_for_not_in() {
        let (outer, inner) = rels();
        let not_false = Expr::BooleanTest {
            test: BoolTestType::IsNotFalse,
            arg: Box::new(Expr::eq_op(col(1, "a"), col(2, "b"))),
        };
        let list = vec![rinfo(not_false, false)];

        assert_eq!(select_hash_clauses(&outer, &inner, &list, JoinType::LasjNotIn).len(), 1);
        assert!(select_hash_clauses(&outer, &inner, &list, JoinType::Anti).is_empty());
        assert!(select_redistribution_clauses(&outer, &inner, &list, JoinType::LasjNotIn).is_empty());
        let (merge, _) = select_mergejoin_clauses(&outer, &inner, &list, JoinType::LasjNotIn);
        assert!(merge.is_empty());
    }
}
