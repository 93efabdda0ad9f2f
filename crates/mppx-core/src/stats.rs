//! # Group Count Estimation
//!
//! The grouping planner sizes every aggregation stage with a group count. It picks
//! which expressions and row counts to ask about; the `CardinalityEstimator`
//! answers.
//!
//! ## Global Estimate
//!
//! `estimate_num_groups` in `NdvEstimator` multiplies the NDVs of the grouping
//! columns, caps the product by the input rows and floors it at 1. That is the worst
//! case where every combination of values exists. No grouping expressions means
//! exactly one group.
//!
//! ## Per-Segment Estimate
//!
//! A partial aggregate runs once per segment, and each segment only sees the groups
//! whose rows landed there. With `G` groups spread evenly over `S` segments and `R`
//! rows per segment, a group has `R * S / G` rows and is present on a given segment
//! unless every one of those rows went elsewhere:
//!
//! ```text
//! groups_on_segment = G * (1 - (1 - 1/S) ^ (R * S / G))
//! ```
//!
//! Few large groups show up on every segment (estimate close to `G`). Many small
//! groups split evenly (estimate close to `G / S`).

use crate::expr::Expr;
use crate::locus::Locus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// NDV assumed for expressions without statistics.
pub const DEFAULT_NUM_DISTINCT: f64 = 200.0;

/// Distinct-group oracle.
pub trait CardinalityEstimator: Send + Sync {
    /// Distinct value combinations of `group_exprs` among `input_rows` rows.
    fn estimate_num_groups(&self, group_exprs: &[Expr], input_rows: f64) -> f64;

    /// Expected groups seen by one segment. `rows` is the per-segment row count of a
    /// path with the given locus.
    fn estimate_num_groups_on_segment(&self, num_groups: f64, rows: f64, locus: &Locus) -> f64 {
        if !locus.is_partitioned() {
            return num_groups;
        }
        let segments = locus.num_segments().max(1) as f64;
        let groups = num_groups.max(1.0);
        let rows_per_group = rows * segments / groups;
        let present = 1.0 - (1.0 - 1.0 / segments).powf(rows_per_group);
        (groups * present).clamp(1.0, rows.max(1.0))
    }
}

/// Per-column statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV).
    pub distinct_count: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    pub null_fraction: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
        }
    }
}

/// Estimator backed by per-column NDVs keyed by `ColumnRef` display name
/// (`r<relid>.<column>`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NdvEstimator {
    pub column_stats: HashMap<String, ColumnStatistics>,
}

impl NdvEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }

    fn expr_ndv(&self, expr: &Expr, input_rows: f64) -> f64 {
        match expr {
            Expr::Column(c) => self
                .column_stats
                .get(&c.to_string())
                .map(|s| {
                    // NULL counts as one more distinct value.
                    let nulls = if s.null_fraction > 0.0 { 1.0 } else { 0.0 };
                    s.distinct_count + nulls
                })
                .unwrap_or(DEFAULT_NUM_DISTINCT.min(input_rows)),
            Expr::Literal(_) => 1.0,
            other => {
                let cols = other.columns();
                if cols.is_empty() {
                    return DEFAULT_NUM_DISTINCT.min(input_rows);
                }
                cols.iter()
                    .map(|c| self.expr_ndv(&Expr::Column((*c).clone()), input_rows))
                    .product()
            }
        }
    }
}

impl CardinalityEstimator for NdvEstimator {
    fn estimate_num_groups(&self, group_exprs: &[Expr], input_rows: f64) -> f64 {
        if group_exprs.is_empty() {
            return 1.0;
        }
        let mut seen: Vec<&Expr> = Vec::with_capacity(group_exprs.len());
        let mut groups = 1.0_f64;
        for expr in group_exprs {
            if seen.contains(&expr) {
                continue;
            }
            seen.push(expr);
            groups *= self.expr_ndv(expr, input_rows).max(1.0);
        }
        groups.min(input_rows).max(1.0)
    }
}
