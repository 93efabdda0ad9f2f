//! # mppx-core: Path Planner Core Types
//!
//! Value types and oracle traits shared by the join and grouping path generators of
//! an MPP (massively parallel) query planner.
//!
//! ## Module Overview
//!
//! - **`locus`**: where an intermediate result's rows live (hashed, strewn, single
//!   worker, replicated, coordinator).
//! - **`path`**: immutable candidate plan nodes, shared via `Arc`.
//! - **`expr`**, **`target`**: expressions, target lists, sort-group clauses.
//! - **`pathkeys`**: sort orders.
//! - **`relation`**, **`query`**: relation bookkeeping, restriction clauses and the
//!   analyzed query the planners read.
//! - **`cost`**, **`stats`**: cost, memory-sizing and group-count oracles with default
//!   implementations.
//! - **`collector`**: the `add_path` contract and a reference dominance collector.
//! - **`config`**, **`context`**: feature switches and the immutable planning session.
//! - **`bitmapset`**: small-integer sets for relids and sort-group ref sets.
//! - **`error`**: fatal planner errors.

pub mod bitmapset;
pub mod collector;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod expr;
pub mod locus;
pub mod path;
pub mod pathkeys;
pub mod query;
pub mod relation;
pub mod stats;
pub mod target;
