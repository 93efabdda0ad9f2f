//! # Path Collection
//!
//! Every planner in this workspace ends by handing candidates to a `PathCollector`.
//! The collector owns the retained set for one relation and decides what survives.
//!
//! `PathList` is the reference collector. It keeps a candidate unless some retained
//! path is at least as cheap (within a 1% fuzz factor) on both startup and total
//! cost, is sorted at least as usefully, has the same locus, and needs no more outer
//! parameters. A new candidate likewise evicts retained paths it dominates.
//!
//! `Vec<Arc<Path>>` also implements the trait by keeping everything it is given,
//! which is what tests want when they count candidates.

use crate::bitmapset::Relids;
use crate::path::Path;
use crate::pathkeys::{pathkeys_contained_in, PathKey};
use std::sync::Arc;
use tracing::trace;

const FUZZ_FACTOR: f64 = 1.01;

pub trait PathCollector {
    fn add_path(&mut self, path: Arc<Path>);

    /// Cheap check whether a path with these properties could survive `add_path`.
    fn add_path_precheck(&self, startup_cost: f64, total_cost: f64, pathkeys: &[PathKey], required_outer: &Relids)
        -> bool;
}

#[derive(Debug, Default)]
pub struct PathList {
    pub paths: Vec<Arc<Path>>,
}

impl PathList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cheapest_total(&self) -> Option<&Arc<Path>> {
        self.paths.iter().min_by(|a, b| a.total_cost.total_cmp(&b.total_cost))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// True if `a` is no worse than `b` on every dimension the collector tracks.
fn dominates(a: &Path, b: &Path) -> bool {
    a.total_cost <= b.total_cost * FUZZ_FACTOR
        && a.startup_cost <= b.startup_cost * FUZZ_FACTOR
        && a.locus == b.locus
        && pathkeys_contained_in(&b.pathkeys, &a.pathkeys)
        && a.required_outer.is_subset(&b.required_outer)
}

impl PathCollector for PathList {
    fn add_path(&mut self, path: Arc<Path>) {
        if let Some(old) = self.paths.iter().find(|old| dominates(old, &path)) {
            trace!(
                "rejecting path cost={:.2}, dominated by cost={:.2}",
                path.total_cost,
                old.total_cost
            );
            return;
        }
        self.paths.retain(|old| !dominates(&path, old));
        self.paths.push(path);
    }

    fn add_path_precheck(
        &self,
        startup_cost: f64,
        total_cost: f64,
        pathkeys: &[PathKey],
        required_outer: &Relids,
    ) -> bool {
        !self.paths.iter().any(|old| {
            old.total_cost <= total_cost
                && old.startup_cost <= startup_cost
                && pathkeys_contained_in(pathkeys, &old.pathkeys)
                && old.required_outer.is_subset(required_outer)
        })
    }
}

impl PathCollector for Vec<Arc<Path>> {
    fn add_path(&mut self, path: Arc<Path>) {
        self.push(path);
    }

    fn add_path_precheck(&self, _: f64, _: f64, _: &[PathKey], _: &Relids) -> bool {
        true
    }
}
