//! # Locus
//!
//! A locus describes where the rows of an intermediate result live at run time. It is
//! the distributed counterpart of a sort order: operators that need rows with equal
//! keys on the same segment (grouping, joining) check the locus of their input and
//! ask for a motion when it does not fit.
//!
//! ## Variants
//!
//! - `Entry`: every row on the coordinator.
//! - `SingleQE(n)`: every row on one worker of an `n`-segment cluster.
//! - `Hashed(n, keys)`: rows spread over `n` segments by the hash of `keys`.
//! - `Strewn(n)`: rows spread over `n` segments with no known key.
//! - `Replicated(n)`: a full copy of the rows on each of `n` segments.
//! - `Null`: no locus; used as "no motion needed" in planner decisions.
//!
//! `Entry` and `SingleQE` are bottlenecks: aggregating or joining on them never needs
//! a motion because all rows already sit in one place.

use crate::expr::{Expr, OpFamily};
use serde::{Deserialize, Serialize};

/// One hash-distribution key: the expression and the operator family its hash is
/// computed with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributionKey {
    pub expr: Expr,
    pub opfamily: OpFamily,
}

impl DistributionKey {
    /// Key over `expr` using its type's default family.
    pub fn for_expr(expr: &Expr) -> Option<Self> {
        expr.data_type().distribution_opfamily().map(|opfamily| Self {
            expr: expr.clone(),
            opfamily,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locus {
    Entry,
    SingleQE { numsegments: usize },
    Hashed { numsegments: usize, keys: Vec<DistributionKey> },
    Strewn { numsegments: usize },
    Replicated { numsegments: usize },
    Null,
}

impl Locus {
    pub fn single_qe(numsegments: usize) -> Self {
        debug_assert!(numsegments > 0);
        Locus::SingleQE { numsegments }
    }

    pub fn strewn(numsegments: usize) -> Self {
        debug_assert!(numsegments > 0);
        Locus::Strewn { numsegments }
    }

    pub fn replicated(numsegments: usize) -> Self {
        debug_assert!(numsegments > 0);
        Locus::Replicated { numsegments }
    }

    /// Hashed locus over `exprs`. `None` when the list is empty or some expression
    /// has no distribution operator family.
    pub fn from_exprs(exprs: &[Expr], numsegments: usize) -> Option<Self> {
        debug_assert!(numsegments > 0);
        if exprs.is_empty() {
            return None;
        }
        let keys = exprs
            .iter()
            .map(DistributionKey::for_expr)
            .collect::<Option<Vec<_>>>()?;
        Some(Locus::Hashed { numsegments, keys })
    }

    pub fn is_bottleneck(&self) -> bool {
        matches!(self, Locus::Entry | Locus::SingleQE { .. })
    }

    pub fn is_partitioned(&self) -> bool {
        matches!(self, Locus::Hashed { .. } | Locus::Strewn { .. })
    }

    pub fn is_hashed(&self) -> bool {
        matches!(self, Locus::Hashed { .. })
    }

    pub fn is_replicated(&self) -> bool {
        matches!(self, Locus::Replicated { .. })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Locus::Null)
    }

    /// Segment count; 1 for `Entry`, 0 for `Null`.
    pub fn num_segments(&self) -> usize {
        match self {
            Locus::Entry => 1,
            Locus::Null => 0,
            Locus::SingleQE { numsegments }
            | Locus::Hashed { numsegments, .. }
            | Locus::Strewn { numsegments }
            | Locus::Replicated { numsegments } => *numsegments,
        }
    }

    pub fn keys(&self) -> &[DistributionKey] {
        match self {
            Locus::Hashed { keys, .. } => keys,
            _ => &[],
        }
    }

    /// True if rows that agree on every expression in `exprs` are guaranteed to sit on
    /// the same segment: the locus is hashed and each of its keys is one of `exprs`,
    /// hashed with the expression's own operator family.
    pub fn is_hashed_on_exprs(&self, exprs: &[Expr]) -> bool {
        let Locus::Hashed { keys, .. } = self else {
            return false;
        };
        keys.iter().all(|key| {
            exprs
                .iter()
                .any(|e| *e == key.expr && e.data_type().distribution_opfamily() == Some(key.opfamily))
        })
    }
}
