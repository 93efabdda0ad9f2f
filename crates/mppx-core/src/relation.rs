//! # Relations and Restriction Clauses
//!
//! `RelOptInfo` is the per-relation bookkeeping the join enumerator reads: the
//! relation's paths and which of them are cheapest. `RestrictInfo` wraps one WHERE or
//! ON conjunct with what the enumerator needs to know about it as a join clause: which
//! relations each side reads, and whether it can drive a merge join, a hash join or a
//! redistribution.

use crate::bitmapset::Relids;
use crate::expr::{BinaryOp, BoolTestType, Expr};
use crate::path::Path;
use serde::Serialize;
use std::sync::Arc;

/// A base or join relation as seen by path generation.
#[derive(Debug, Clone, Default)]
pub struct RelOptInfo {
    pub relids: Relids,
    /// Estimated rows of the relation, summed over segments.
    pub rows: f64,
    pub pathlist: Vec<Arc<Path>>,
    pub cheapest_startup_path: Option<Arc<Path>>,
    pub cheapest_total_path: Option<Arc<Path>>,
    /// Cheapest unparameterized path followed by the cheapest path for each distinct
    /// parameterization.
    pub cheapest_parameterized_paths: Vec<Arc<Path>>,
    /// Relations this relation references laterally.
    pub lateral_relids: Relids,
}

impl RelOptInfo {
    pub fn new(relids: Relids, rows: f64) -> Self {
        Self {
            relids,
            rows,
            ..Default::default()
        }
    }

    /// Relation with the given paths and cheapest-path slots filled in.
    pub fn with_paths(relids: Relids, rows: f64, paths: Vec<Path>) -> Self {
        let mut rel = Self::new(relids, rows);
        rel.pathlist = paths.into_iter().map(Arc::new).collect();
        rel.set_cheapest();
        rel
    }

    pub fn set_cheapest(&mut self) {
        let unparam: Vec<&Arc<Path>> = self.pathlist.iter().filter(|p| !p.is_parameterized()).collect();
        let pool: Vec<&Arc<Path>> = if unparam.is_empty() {
            self.pathlist.iter().collect()
        } else {
            unparam
        };

        self.cheapest_total_path = pool
            .iter()
            .min_by(|a, b| {
                a.total_cost
                    .total_cmp(&b.total_cost)
                    .then(a.startup_cost.total_cmp(&b.startup_cost))
            })
            .map(|p| Arc::clone(p));
        self.cheapest_startup_path = pool
            .iter()
            .min_by(|a, b| {
                a.startup_cost
                    .total_cmp(&b.startup_cost)
                    .then(a.total_cost.total_cmp(&b.total_cost))
            })
            .map(|p| Arc::clone(p));

        let mut params: Vec<Arc<Path>> = Vec::new();
        if let Some(total) = &self.cheapest_total_path {
            params.push(Arc::clone(total));
        }
        for path in self.pathlist.iter().filter(|p| p.is_parameterized()) {
            match params
                .iter_mut()
                .find(|q| q.is_parameterized() && q.required_outer == path.required_outer)
            {
                Some(existing) if existing.total_cost <= path.total_cost => {}
                Some(existing) => *existing = Arc::clone(path),
                None => params.push(Arc::clone(path)),
            }
        }
        self.cheapest_parameterized_paths = params;
    }
}

/// One restriction clause with join-clause annotations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestrictInfo {
    pub clause: Expr,
    pub clause_relids: Relids,
    /// Relations read by the left operand, for binary clauses.
    pub left_relids: Relids,
    pub right_relids: Relids,
    /// The clause came from WHERE (or was pushed down) rather than from an outer
    /// join's ON condition.
    pub is_pushed_down: bool,
    /// Each side reads relations the other does not.
    pub can_join: bool,
    pub mergejoinable: bool,
    pub hashjoinable: bool,
}

impl RestrictInfo {
    pub fn new(clause: Expr, is_pushed_down: bool) -> Self {
        let clause_relids = clause.relids();
        let mut rinfo = Self {
            clause,
            clause_relids,
            left_relids: Relids::new(),
            right_relids: Relids::new(),
            is_pushed_down,
            can_join: false,
            mergejoinable: false,
            hashjoinable: false,
        };

        let (eq, via_bool_test) = match &rinfo.clause {
            Expr::BooleanTest {
                test: BoolTestType::IsNotFalse,
                arg,
            } => (arg.as_ref(), true),
            other => (other, false),
        };
        let Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } = eq
        else {
            return rinfo;
        };

        let (lt, rt) = (left.data_type(), right.data_type());
        let same_family = lt.distribution_opfamily().is_some() && lt.distribution_opfamily() == rt.distribution_opfamily();
        let left_relids = left.relids();
        let right_relids = right.relids();
        rinfo.can_join =
            !left_relids.is_empty() && !right_relids.is_empty() && !left_relids.overlap(&right_relids);
        rinfo.left_relids = left_relids;
        rinfo.right_relids = right_relids;
        rinfo.hashjoinable = same_family && lt.has_hashable_eq() && rt.has_hashable_eq();
        rinfo.mergejoinable =
            !via_bool_test && same_family && lt.has_mergejoinable_eq() && rt.has_mergejoinable_eq();
        rinfo
    }

    pub fn is_bool_test(&self) -> bool {
        matches!(self.clause, Expr::BooleanTest { .. })
    }

    fn operands(&self) -> Option<(&Expr, &Expr)> {
        let eq = match &self.clause {
            Expr::BooleanTest { arg, .. } => arg.as_ref(),
            other => other,
        };
        match eq {
            Expr::BinaryOp { left, right, .. } => Some((left, right)),
            _ => None,
        }
    }

    pub fn left_expr(&self) -> Option<&Expr> {
        self.operands().map(|(l, _)| l)
    }

    pub fn right_expr(&self) -> Option<&Expr> {
        self.operands().map(|(_, r)| r)
    }

    /// Both operands hash with the same distribution family, so matching rows can be
    /// brought together by redistributing each side on its own operand.
    pub fn is_redistributable(&self) -> bool {
        let Some((l, r)) = self.operands() else {
            return false;
        };
        let family = l.data_type().distribution_opfamily();
        family.is_some() && family == r.data_type().distribution_opfamily()
    }
}

/// A join clause oriented for one particular (outer, inner) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub rinfo: Arc<RestrictInfo>,
    pub outer_is_left: bool,
}

impl JoinClause {
    pub fn outer_expr(&self) -> Option<&Expr> {
        if self.outer_is_left {
            self.rinfo.left_expr()
        } else {
            self.rinfo.right_expr()
        }
    }

    pub fn inner_expr(&self) -> Option<&Expr> {
        if self.outer_is_left {
            self.rinfo.right_expr()
        } else {
            self.rinfo.left_expr()
        }
    }
}
