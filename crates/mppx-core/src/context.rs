//! # Planning Session
//!
//! `PlannerContext` bundles everything path generation reads but never changes: the
//! configuration, the query, and the cost, cardinality and memory oracles. It is
//! borrowed immutably by every planner entry point; all per-call mutable state lives
//! in the relation being built and in the path collector.

use crate::config::PlannerConfig;
use crate::cost::{CostModel, MemorySizer};
use crate::query::PlannerQuery;
use crate::stats::CardinalityEstimator;

pub struct PlannerContext<'a> {
    pub config: &'a PlannerConfig,
    pub query: &'a PlannerQuery,
    pub cost_model: &'a dyn CostModel,
    pub estimator: &'a dyn CardinalityEstimator,
    pub sizer: &'a dyn MemorySizer,
}

impl<'a> PlannerContext<'a> {
    pub fn new(
        config: &'a PlannerConfig,
        query: &'a PlannerQuery,
        cost_model: &'a dyn CostModel,
        estimator: &'a dyn CardinalityEstimator,
        sizer: &'a dyn MemorySizer,
    ) -> Self {
        Self {
            config,
            query,
            cost_model,
            estimator,
            sizer,
        }
    }
}
