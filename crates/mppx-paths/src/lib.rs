//! # mppx-paths: Join and Aggregation Path Generation
//!
//! Candidate path generators for a distributed (MPP) query planner. Every generator
//! reads an immutable [`mppx_core::context::PlannerContext`], builds new paths on top
//! of existing ones, and hands each candidate to a
//! [`mppx_core::collector::PathCollector`]. Choosing among candidates is the
//! collector's job.
//!
//! ## Module Overview
//!
//! - **`grouping_locus`**: where grouping has to happen, and whether the input must
//!   move to get there.
//! - **`joinpath`**: merge, nested-loop and hash join candidates for one pair of
//!   input relations.
//! - **`grouping`**: one-stage and two-stage aggregation, including the DISTINCT
//!   aggregate planners (single shape, mixed, tuple split).
//! - **`motion`**: motion nodes and the motion plan for a join's two inputs.
//! - **`pathnode`**: sort, material, projection, aggregate, tuple-split and unique
//!   path constructors.
//!
//! ## Abstaining
//!
//! A generator that has nothing useful to offer returns `Ok(())` without submitting
//! anything. Errors are reserved for broken inputs, such as a group clause that
//! references a missing target column.

pub mod grouping;
pub mod grouping_locus;
pub mod joinpath;
pub mod motion;
pub mod pathnode;

#[cfg(test)]
mod test_support;
