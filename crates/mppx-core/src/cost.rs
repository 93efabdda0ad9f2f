//! # Cost Model
//!
//! Path generation never computes costs itself. It hands path shapes to a
//! `CostModel` and gets back a (startup, total) pair, then lets the path collector
//! compare candidates.
//!
//! ## Two-Phase Join Costing
//!
//! Join candidates are costed twice. `initial_cost_*` returns a cheap lower bound
//! from the input paths alone; the enumerator feeds it to the collector's precheck
//! and only builds the full candidate if the bound could still win.
//! `final_cost_join` then adds the per-output-row charge once the join's row count
//! is known.
//!
//! ## Default Model
//!
//! `DefaultCostModel` collapses three dimensions into one number:
//!
//! ```text
//! cost = cpu_weight * tuples_processed + memory_weight * kb_held + network_weight * kb_moved
//! ```
//!
//! Network is weighted 10x by default: in an MPP cluster a motion almost always
//! dominates the per-row CPU cost of the operators around it.
//!
//! ## Memory Sizing
//!
//! Hash aggregation is only planned when its table fits the per-operator memory
//! budget. `MemorySizer` answers that question; `HashAggSizing` is the default.

use crate::expr::{Aggref, Expr, JoinType};
use crate::path::{AggSplit, AggStrategy, MotionType, Path};
use crate::pathkeys::PathKey;
use serde::{Deserialize, Serialize};

/// Per-tuple CPU charge, before weighting.
const CPU_TUPLE_COST: f64 = 0.01;
/// Per-comparison / per-aggregate-call CPU charge, before weighting.
const CPU_OPERATOR_COST: f64 = 0.0025;
/// Bytes of transition state per aggregate call and group.
const TRANS_STATE_BYTES: f64 = 8.0;

/// Startup and total cost of a path. Lower is better.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Cost {
    pub startup: f64,
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn new(startup: f64, total: f64) -> Self {
        Self { startup, total }
    }
}

/// Epsilon-based equality to handle floating-point imprecision in cost comparisons.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.startup - other.startup).abs() < f64::EPSILON && (self.total - other.total).abs() < f64::EPSILON
    }
}

/// Summary of the aggregate calls in one aggregation phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggClauseCosts {
    pub num_aggs: usize,
    /// Aggregates with ORDER BY (or DISTINCT with an ORDER BY).
    pub num_ordered_aggs: usize,
    /// Every DISTINCT aggregate call, in target-list order.
    pub distinct_aggrefs: Vec<Aggref>,
    pub trans_cost: f64,
    pub final_cost: f64,
    /// Transition state bytes per group.
    pub trans_space: f64,
}

impl AggClauseCosts {
    /// Costs of every aggregate call found in `exprs`, run as a single phase.
    ///
    /// Each call is charged one operator per argument plus one for its transition
    /// step, and one more to finalize. The transition state is sized as one datum.
    pub fn from_exprs(exprs: &[Expr]) -> Self {
        let mut costs = Self::default();
        for agg in exprs.iter().flat_map(|e| e.collect_aggrefs()) {
            costs.num_aggs += 1;
            if !agg.order_by.is_empty() {
                costs.num_ordered_aggs += 1;
            }
            if agg.is_distinct() {
                costs.distinct_aggrefs.push(agg.clone());
            }
            costs.trans_cost += CPU_OPERATOR_COST * (agg.args.len() + 1) as f64;
            costs.final_cost += CPU_OPERATOR_COST;
            costs.trans_space += TRANS_STATE_BYTES;
        }
        costs
    }

    pub fn has_distinct(&self) -> bool {
        !self.distinct_aggrefs.is_empty()
    }
}

/// Pluggable cost oracle.
pub trait CostModel: Send + Sync {
    fn cost_sort(&self, input: &Path, pathkeys: &[PathKey]) -> Cost;

    fn cost_motion(&self, input: &Path, motion: MotionType, target_segments: usize) -> Cost;

    fn cost_material(&self, input: &Path) -> Cost;

    #[allow(clippy::too_many_arguments)]
    fn cost_agg(
        &self,
        strategy: AggStrategy,
        split: AggSplit,
        agg_costs: &AggClauseCosts,
        num_group_cols: usize,
        num_groups: f64,
        input: &Path,
        width: u32,
    ) -> Cost;

    fn cost_tuple_split(&self, input: &Path, fanout: usize) -> Cost;

    fn cost_unique(&self, input: &Path, num_groups: f64, hashed: bool) -> Cost;

    fn cost_projection(&self, input: &Path) -> Cost;

    fn initial_cost_nestloop(&self, jointype: JoinType, outer: &Path, inner: &Path) -> Cost;

    fn initial_cost_mergejoin(
        &self,
        jointype: JoinType,
        num_mergeclauses: usize,
        outer: &Path,
        inner: &Path,
        outersortkeys: &[PathKey],
        innersortkeys: &[PathKey],
    ) -> Cost;

    fn initial_cost_hashjoin(&self, jointype: JoinType, num_hashclauses: usize, outer: &Path, inner: &Path) -> Cost;

    /// Add the output charge to a join's initial estimate.
    fn final_cost_join(&self, initial: Cost, output_rows: f64) -> Cost;
}

/// Weighted CPU / memory / network cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultCostModel {
    pub cpu_weight: f64,
    pub memory_weight: f64,
    pub network_weight: f64,
}

impl Default for DefaultCostModel {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            memory_weight: 1.0,
            network_weight: 10.0,
        }
    }
}

impl DefaultCostModel {
    fn cpu(&self, tuples: f64) -> f64 {
        self.cpu_weight * CPU_TUPLE_COST * tuples
    }

    fn ops(&self, comparisons: f64) -> f64 {
        self.cpu_weight * CPU_OPERATOR_COST * comparisons
    }

    fn memory(&self, bytes: f64) -> f64 {
        self.memory_weight * CPU_TUPLE_COST * bytes / 1024.0
    }

    fn network(&self, bytes: f64) -> f64 {
        self.network_weight * CPU_TUPLE_COST * bytes / 1024.0
    }

    fn sort_cost(&self, rows: f64, num_keys: usize) -> f64 {
        let rows = rows.max(2.0);
        self.ops(rows * rows.log2() * num_keys.max(1) as f64)
    }
}

impl CostModel for DefaultCostModel {
    fn cost_sort(&self, input: &Path, pathkeys: &[PathKey]) -> Cost {
        // Sorting is blocking: nothing comes out before the whole input is consumed.
        let startup = input.total_cost + self.sort_cost(input.rows, pathkeys.len());
        Cost::new(startup, startup + self.cpu(input.rows))
    }

    fn cost_motion(&self, input: &Path, motion: MotionType, target_segments: usize) -> Cost {
        let width = f64::from(input.target.width.max(1));
        let source_segments = input.locus.num_segments().max(1) as f64;
        let bytes = match motion {
            // One receiver does all the work.
            MotionType::Gather => input.total_rows() * width,
            // Senders work in parallel.
            MotionType::Redistribute => input.total_rows() * width / source_segments,
            MotionType::Broadcast => input.total_rows() * width * target_segments.max(1) as f64 / source_segments,
        };
        let run = self.network(bytes) + self.cpu(input.rows);
        Cost::new(input.startup_cost, input.total_cost + run)
    }

    fn cost_material(&self, input: &Path) -> Cost {
        let width = f64::from(input.target.width.max(1));
        Cost::new(
            input.startup_cost,
            input.total_cost + self.cpu(input.rows) + self.memory(input.rows * width),
        )
    }

    fn cost_agg(
        &self,
        strategy: AggStrategy,
        split: AggSplit,
        agg_costs: &AggClauseCosts,
        num_group_cols: usize,
        num_groups: f64,
        input: &Path,
        width: u32,
    ) -> Cost {
        let transition = agg_costs.trans_cost.max(CPU_OPERATOR_COST * agg_costs.num_aggs as f64);
        let finalize = if split.skips_final() { 0.0 } else { agg_costs.final_cost };
        let per_row = self.cpu(input.rows) + self.cpu_weight * transition * input.rows;
        let compare = self.ops(input.rows * num_group_cols as f64);
        let output = self.cpu(num_groups) + self.cpu_weight * finalize * num_groups;

        match strategy {
            AggStrategy::Plain => {
                let total = input.total_cost + per_row + output;
                Cost::new(total, total)
            }
            AggStrategy::Sorted => Cost::new(
                input.startup_cost,
                input.total_cost + per_row + compare + output,
            ),
            AggStrategy::Hashed => {
                let table_bytes = num_groups * (f64::from(width) + agg_costs.trans_space);
                let startup = input.total_cost + per_row + compare + self.memory(table_bytes);
                Cost::new(startup, startup + output)
            }
        }
    }

    fn cost_tuple_split(&self, input: &Path, fanout: usize) -> Cost {
        Cost::new(
            input.startup_cost,
            input.total_cost + self.cpu(input.rows * fanout.max(1) as f64),
        )
    }

    fn cost_unique(&self, input: &Path, num_groups: f64, hashed: bool) -> Cost {
        if hashed {
            let width = f64::from(input.target.width.max(1));
            let startup = input.total_cost + self.ops(input.rows) + self.memory(num_groups * width);
            Cost::new(startup, startup + self.cpu(num_groups))
        } else {
            let sort = self.sort_cost(input.rows, 1);
            let startup = input.total_cost + sort;
            Cost::new(startup, startup + self.ops(input.rows) + self.cpu(num_groups))
        }
    }

    fn cost_projection(&self, input: &Path) -> Cost {
        Cost::new(input.startup_cost, input.total_cost + self.ops(input.rows))
    }

    fn initial_cost_nestloop(&self, jointype: JoinType, outer: &Path, inner: &Path) -> Cost {
        let outer_rows = outer.rows.max(1.0);
        let rescan = if inner.materializes_output() {
            self.cpu(inner.rows)
        } else {
            inner.total_cost - inner.startup_cost
        };
        // Semi and anti joins stop scanning the inner side at the first match.
        let fraction = match jointype {
            JoinType::Semi | JoinType::Anti | JoinType::LasjNotIn => 0.5,
            _ => 1.0,
        };
        let startup = outer.startup_cost + inner.startup_cost;
        let run = (outer.total_cost - outer.startup_cost)
            + (inner.total_cost - inner.startup_cost)
            + (outer_rows - 1.0) * rescan * fraction
            + self.ops(outer_rows * inner.rows * fraction);
        Cost::new(startup, startup + run)
    }

    fn initial_cost_mergejoin(
        &self,
        _jointype: JoinType,
        num_mergeclauses: usize,
        outer: &Path,
        inner: &Path,
        outersortkeys: &[PathKey],
        innersortkeys: &[PathKey],
    ) -> Cost {
        let mut startup = 0.0;
        let mut total = 0.0;
        for (side, sortkeys) in [(outer, outersortkeys), (inner, innersortkeys)] {
            let sort = if sortkeys.is_empty() {
                Cost::new(side.startup_cost, side.total_cost)
            } else {
                self.cost_sort(side, sortkeys)
            };
            startup += sort.startup;
            total += sort.total;
        }
        let compare = self.ops((outer.rows + inner.rows) * num_mergeclauses.max(1) as f64);
        Cost::new(startup, total + compare)
    }

    fn initial_cost_hashjoin(&self, _jointype: JoinType, num_hashclauses: usize, outer: &Path, inner: &Path) -> Cost {
        let width = f64::from(inner.target.width.max(1));
        let build = inner.total_cost + self.cpu(inner.rows) + self.memory(inner.rows * width);
        let startup = outer.startup_cost + build;
        let probe = (outer.total_cost - outer.startup_cost) + self.ops(outer.rows * num_hashclauses.max(1) as f64);
        Cost::new(startup, startup + probe)
    }

    fn final_cost_join(&self, initial: Cost, output_rows: f64) -> Cost {
        Cost::new(initial.startup, initial.total + self.cpu(output_rows))
    }
}

/// Planned size of an aggregation hash table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HashAggTableSizes {
    pub num_entries: f64,
    pub entry_width: f64,
    pub num_buckets: f64,
    pub table_bytes: f64,
}

/// Memory-sizing oracle for hash aggregation.
pub trait MemorySizer: Send + Sync {
    /// Size a hash table for `num_groups` entries of `width` bytes. `None` if it would
    /// not fit in `budget_bytes`.
    fn calc_hash_agg_table_sizes(&self, budget_bytes: f64, num_groups: f64, width: u32) -> Option<HashAggTableSizes>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashAggSizing {
    /// Per-entry bookkeeping bytes on top of the grouping key and transition state.
    pub entry_overhead: f64,
    pub bucket_width: f64,
    /// Target entries per bucket.
    pub load_factor: f64,
}

impl Default for HashAggSizing {
    fn default() -> Self {
        Self {
            entry_overhead: 32.0,
            bucket_width: 8.0,
            load_factor: 1.0,
        }
    }
}

impl MemorySizer for HashAggSizing {
    fn calc_hash_agg_table_sizes(&self, budget_bytes: f64, num_groups: f64, width: u32) -> Option<HashAggTableSizes> {
        let num_entries = num_groups.max(1.0).ceil();
        let entry_width = f64::from(width) + self.entry_overhead;
        let num_buckets = (num_entries / self.load_factor.max(f64::MIN_POSITIVE)).ceil().max(1.0);
        let table_bytes = num_entries * entry_width + num_buckets * self.bucket_width;
        if table_bytes > budget_bytes {
            return None;
        }
        Some(HashAggTableSizes {
            num_entries,
            entry_width,
            num_buckets,
            table_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmapset::Relids;
    use crate::locus::Locus;
    use crate::target::PathTarget;
    use std::sync::Arc;

    fn scan(locus: Locus, rows: f64, total: f64) -> Path {
        let mut target = PathTarget::new();
        target.width = 16;
        Path::scan(Relids::singleton(1), locus, rows, total, Arc::new(target))
    }

    #[test]
    fn test_agg_costs_from_exprs() {
        use crate::expr::{BinaryOp, DataType};

        let a = Expr::column(1, "a", 0, DataType::Int4);
        let b = Expr::column(1, "b", 0, DataType::Int4);
        assert_eq!(AggClauseCosts::from_exprs(&[a.clone(), Expr::AggExprId]).num_aggs, 0);

        let sum = Expr::Aggref(Box::new(Aggref::new("sum", vec![a.clone()], DataType::Int8)));
        let count = Expr::Aggref(Box::new(Aggref::distinct("count", vec![b], DataType::Int8)));
        let costs = AggClauseCosts::from_exprs(&[
            a,
            Expr::BinaryOp {
                op: BinaryOp::Add,
                left: Box::new(sum),
                right: Box::new(count),
            },
        ]);
        assert_eq!(costs.num_aggs, 2);
        assert_eq!(costs.distinct_aggrefs.len(), 1);
        assert_eq!(costs.num_ordered_aggs, 0);
        assert!((costs.trans_cost - 4.0 * CPU_OPERATOR_COST).abs() < 1e-12);
        assert_eq!(costs.trans_space, 2.0 * TRANS_STATE_BYTES);
    }

    #[test]
    fn test_hash_join_prefers_small_build_side() {
        let model = DefaultCostModel::default();
        let small = scan(Locus::strewn(3), 100.0, 10.0);
        let large = scan(Locus::strewn(3), 1_000_000.0, 10_000.0);

        let small_build = model.initial_cost_hashjoin(JoinType::Inner, 1, &large, &small);
        let large_build = model.initial_cost_hashjoin(JoinType::Inner, 1, &small, &large);
        assert!(small_build.total < large_build.total);
    }

    #[test]
    fn test_broadcast_costs_more_than_redistribute() {
        let model = DefaultCostModel::default();
        let input = scan(Locus::strewn(4), 10_000.0, 100.0);
        let redistribute = model.cost_motion(&input, MotionType::Redistribute, 4);
        let broadcast = model.cost_motion(&input, MotionType::Broadcast, 4);
        assert!(broadcast.total > redistribute.total);
        assert_eq!(redistribute.startup, input.startup_cost);
    }

    #[test]
    fn test_hash_sizing_respects_budget() {
        let sizing = HashAggSizing::default();
        let fits = sizing.calc_hash_agg_table_sizes(1024.0 * 1024.0, 1000.0, 24).unwrap();
        assert_eq!(fits.num_entries, 1000.0);
        assert!(fits.table_bytes <= 1024.0 * 1024.0);
        assert!(sizing.calc_hash_agg_table_sizes(1024.0, 1000.0, 24).is_none());
    }
}
