//! Shared fixtures for unit tests.

use mppx_core::bitmapset::Relids;
use mppx_core::config::PlannerConfig;
use mppx_core::context::PlannerContext;
use mppx_core::cost::{DefaultCostModel, HashAggSizing};
use mppx_core::expr::{DataType, Expr};
use mppx_core::locus::Locus;
use mppx_core::path::Path;
use mppx_core::query::PlannerQuery;
use mppx_core::stats::NdvEstimator;
use mppx_core::target::PathTarget;
use std::sync::Arc;

pub(crate) struct Fixture {
    pub config: PlannerConfig,
    pub query: PlannerQuery,
    pub cost_model: DefaultCostModel,
    pub estimator: NdvEstimator,
    pub sizer: HashAggSizing,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            config: PlannerConfig::default(),
            query: PlannerQuery::default(),
            cost_model: DefaultCostModel::default(),
            estimator: NdvEstimator::new(),
            sizer: HashAggSizing::default(),
        }
    }

    pub fn with_query(mut self, query: PlannerQuery) -> Self {
        self.query = query;
        self
    }

    pub fn ctx(&self) -> PlannerContext<'_> {
        PlannerContext::new(&self.config, &self.query, &self.cost_model, &self.estimator, &self.sizer)
    }
}

pub(crate) fn col(relid: usize, name: &str) -> Expr {
    Expr::column(relid, name, 0, DataType::Int4)
}

pub(crate) fn target_of(exprs: &[Expr]) -> Arc<PathTarget> {
    let mut target = PathTarget::new();
    for e in exprs {
        target.add_column(e.clone(), 0);
    }
    Arc::new(target)
}

/// Target over int4 columns of relation 1.
pub(crate) fn int_target(names: &[&str]) -> Arc<PathTarget> {
    let exprs: Vec<Expr> = names.iter().map(|n| col(1, n)).collect();
    target_of(&exprs)
}

pub(crate) fn hashed(exprs: &[Expr]) -> Locus {
    Locus::from_exprs(exprs, 3).expect("hashable test columns")
}

pub(crate) fn scan_path(relids: &[usize], locus: Locus, rows: f64, target: Arc<PathTarget>) -> Arc<Path> {
    Arc::new(Path::scan(
        Relids::from_members(relids.iter().copied()),
        locus,
        rows,
        rows,
        target,
    ))
}
