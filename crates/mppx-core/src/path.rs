//! # Paths
//!
//! A `Path` is one candidate way of producing a relation's rows. Paths are immutable
//! and shared through `Arc`: wrapping a path in a sort, motion or aggregate builds a
//! new node pointing at the old one and never touches it, so the same child can sit
//! under many candidates at once. When the collector drops a candidate, the `Arc`
//! count does the rest.
//!
//! ## Row Counts
//!
//! `rows` is per segment for partitioned loci (`Hashed`, `Strewn`) and the total
//! for every other locus. A gather of a 3-segment path with `rows = 100` yields a
//! single-worker path with `rows = 300`.

use crate::bitmapset::{BitmapSet, Relids};
use crate::expr::{Expr, JoinType};
use crate::locus::Locus;
use crate::pathkeys::{pathkeys_contained_in, PathKey};
use crate::relation::RestrictInfo;
use crate::query::Rollup;
use crate::target::{PathTarget, SortGroupClause};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AggStrategy {
    /// No grouping: one output row.
    Plain,
    /// Group boundaries detected from sorted input.
    Sorted,
    Hashed,
}

/// Which half (or halves) of a split aggregation an aggregate node computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AggSplit {
    /// Whole aggregation in one node.
    Simple,
    /// Partial stage: emit serialized transition states.
    InitialSerial,
    /// Final stage: combine deserialized states and finalize.
    FinalDeserial,
    /// Input already de-duplicated on the DISTINCT key; run DISTINCT aggregates
    /// without their own sort/unique step.
    Deduplicated,
    InitialSerialDeduplicated,
    FinalDeserialDeduplicated,
}

impl AggSplit {
    /// Same split, reading de-duplicated input.
    pub fn deduplicated(self) -> AggSplit {
        match self {
            AggSplit::Simple | AggSplit::Deduplicated => AggSplit::Deduplicated,
            AggSplit::InitialSerial | AggSplit::InitialSerialDeduplicated => AggSplit::InitialSerialDeduplicated,
            AggSplit::FinalDeserial | AggSplit::FinalDeserialDeduplicated => AggSplit::FinalDeserialDeduplicated,
        }
    }

    pub fn is_deduplicated(self) -> bool {
        matches!(
            self,
            AggSplit::Deduplicated | AggSplit::InitialSerialDeduplicated | AggSplit::FinalDeserialDeduplicated
        )
    }

    pub fn skips_final(self) -> bool {
        matches!(self, AggSplit::InitialSerial | AggSplit::InitialSerialDeduplicated)
    }

    pub fn combines(self) -> bool {
        matches!(self, AggSplit::FinalDeserial | AggSplit::FinalDeserialDeduplicated)
    }
}

/// One DISTINCT argument shape carried through a tuple split.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DqaExpr {
    /// Value of the `AggExprId` column on rows produced for this shape.
    pub agg_expr_id: u32,
    /// Sort-group refs of the shape's argument columns.
    pub agg_args_id_bms: BitmapSet,
    pub agg_filter: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MotionType {
    /// Every row to one worker (or the coordinator).
    Gather,
    /// Rows to segments by the hash of the target locus keys.
    Redistribute,
    /// A copy of every row to every segment.
    Broadcast,
}

/// Inputs shared by the three join methods.
#[derive(Debug, Clone, Serialize)]
pub struct JoinPathData {
    pub jointype: JoinType,
    pub outer: Arc<Path>,
    pub inner: Arc<Path>,
    pub joinrestrictinfo: Vec<Arc<RestrictInfo>>,
}

#[derive(Debug, Clone, Serialize)]
pub enum PathKind {
    Scan,
    WorkTableScan,
    Sort {
        subpath: Arc<Path>,
    },
    Motion {
        subpath: Arc<Path>,
        motion: MotionType,
    },
    Material {
        subpath: Arc<Path>,
    },
    Unique {
        subpath: Arc<Path>,
        exprs: Vec<Expr>,
        hashed: bool,
    },
    Projection {
        subpath: Arc<Path>,
    },
    Agg {
        subpath: Arc<Path>,
        strategy: AggStrategy,
        split: AggSplit,
        /// Streaming de-duplication: emit as soon as the hash table fills instead of
        /// spilling. Only used as a pre-pass whose output is de-duplicated again.
        streaming: bool,
        group_clause: Vec<SortGroupClause>,
        qual: Option<Expr>,
        num_groups: f64,
    },
    GroupingSets {
        subpath: Arc<Path>,
        rollups: Vec<Rollup>,
        split: AggSplit,
        num_groups: f64,
    },
    TupleSplit {
        subpath: Arc<Path>,
        group_clause: Vec<SortGroupClause>,
        dqa_exprs: Vec<DqaExpr>,
    },
    NestLoop(JoinPathData),
    MergeJoin {
        join: JoinPathData,
        mergeclauses: Vec<Arc<RestrictInfo>>,
        outersortkeys: Vec<PathKey>,
        innersortkeys: Vec<PathKey>,
    },
    HashJoin {
        join: JoinPathData,
        hashclauses: Vec<Arc<RestrictInfo>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Path {
    pub kind: PathKind,
    /// Relations whose rows this path produces.
    pub parent: Relids,
    pub locus: Locus,
    pub rows: f64,
    pub startup_cost: f64,
    pub total_cost: f64,
    pub pathkeys: Vec<PathKey>,
    pub target: Arc<PathTarget>,
    /// Relations that must supply parameter values from an enclosing nestloop.
    pub required_outer: Relids,
}

impl Path {
    /// Leaf scan path, used by callers to seed base relations.
    pub fn scan(parent: Relids, locus: Locus, rows: f64, total_cost: f64, target: Arc<PathTarget>) -> Self {
        Self {
            kind: PathKind::Scan,
            parent,
            locus,
            rows,
            startup_cost: 0.0,
            total_cost,
            pathkeys: Vec::new(),
            target,
            required_outer: Relids::new(),
        }
    }

    pub fn with_pathkeys(mut self, pathkeys: Vec<PathKey>) -> Self {
        self.pathkeys = pathkeys;
        self
    }

    pub fn with_required_outer(mut self, required_outer: Relids) -> Self {
        self.required_outer = required_outer;
        self
    }

    pub fn with_startup_cost(mut self, startup_cost: f64) -> Self {
        self.startup_cost = startup_cost;
        self
    }

    pub fn worktable_scan(parent: Relids, locus: Locus, rows: f64, target: Arc<PathTarget>) -> Self {
        let mut path = Self::scan(parent, locus, rows, rows, target);
        path.kind = PathKind::WorkTableScan;
        path
    }

    pub fn is_parameterized(&self) -> bool {
        !self.required_outer.is_empty()
    }

    /// Whether the output is already sorted on `pathkeys`.
    pub fn is_sorted_on(&self, pathkeys: &[PathKey]) -> bool {
        pathkeys_contained_in(pathkeys, &self.pathkeys)
    }

    /// Rows summed over all segments.
    pub fn total_rows(&self) -> f64 {
        if self.locus.is_partitioned() {
            self.rows * self.locus.num_segments() as f64
        } else {
            self.rows
        }
    }

    pub fn subpaths(&self) -> Vec<&Arc<Path>> {
        match &self.kind {
            PathKind::Scan | PathKind::WorkTableScan => vec![],
            PathKind::Sort { subpath }
            | PathKind::Motion { subpath, .. }
            | PathKind::Material { subpath }
            | PathKind::Unique { subpath, .. }
            | PathKind::Projection { subpath }
            | PathKind::Agg { subpath, .. }
            | PathKind::GroupingSets { subpath, .. }
            | PathKind::TupleSplit { subpath, .. } => vec![subpath],
            PathKind::NestLoop(join)
            | PathKind::MergeJoin { join, .. }
            | PathKind::HashJoin { join, .. } => vec![&join.outer, &join.inner],
        }
    }

    /// True if the executor node for this path keeps its whole output around, so
    /// rescanning it is cheap and an extra Material node on top is pointless.
    pub fn materializes_output(&self) -> bool {
        matches!(
            self.kind,
            PathKind::Material { .. } | PathKind::Sort { .. } | PathKind::WorkTableScan
        )
    }

    pub fn contains_worktable_scan(&self) -> bool {
        matches!(self.kind, PathKind::WorkTableScan)
            || self.subpaths().into_iter().any(|p| p.contains_worktable_scan())
    }

    /// Number of DISTINCT shapes a tuple split fans each row out to.
    pub fn tuple_split_fanout(&self) -> Option<usize> {
        match &self.kind {
            PathKind::TupleSplit { dqa_exprs, .. } => Some(dqa_exprs.len()),
            _ => None,
        }
    }

    /// Depth-first search for the first node satisfying `pred`.
    pub fn find(&self, pred: &dyn Fn(&Path) -> bool) -> Option<&Path> {
        if pred(self) {
            return Some(self);
        }
        self.subpaths().into_iter().find_map(|p| p.find(pred))
    }
}
