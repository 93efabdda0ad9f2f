//! # Planner Configuration
//!
//! Feature switches and budgets read (never written) by path generation. Missing
//! fields deserialize to their defaults, so a config file only needs to name what it
//! changes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Plan partial + final aggregation across a motion.
    pub enable_multiphase_agg: bool,
    pub enable_hashjoin: bool,
    /// Allow Material nodes above nestloop inner paths.
    pub enable_material: bool,
    /// Plan DISTINCT-qualified aggregates with de-duplicating hash aggregation.
    pub enable_agg_distinct: bool,
    /// Add a streaming de-duplication pass before the DISTINCT motion.
    pub enable_dqa_pruning: bool,
    /// Per-operator memory budget in kilobytes.
    pub work_mem_kb: u64,
    /// Segments in the cluster.
    pub segment_count: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enable_multiphase_agg: true,
            enable_hashjoin: true,
            enable_material: true,
            enable_agg_distinct: true,
            enable_dqa_pruning: true,
            work_mem_kb: 32 * 1024,
            segment_count: 3,
        }
    }
}

impl PlannerConfig {
    pub fn work_mem_bytes(&self) -> f64 {
        self.work_mem_kb as f64 * 1024.0
    }
}
