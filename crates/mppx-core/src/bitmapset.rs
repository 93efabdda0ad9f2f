//! # Bitmap Sets
//!
//! Small-integer sets used for relation ids (`Relids`) and sort-group ref sets
//! (DISTINCT shape bitmaps). Backed by `FixedBitSet`, grown on demand.
//!
//! Two sets with the same members are equal regardless of how far either has been
//! grown, so equality and hashing are defined over the member list rather than the
//! underlying block storage.

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A dynamically sized set of non-negative integers.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BitmapSet {
    bits: FixedBitSet,
}

/// Set of relation ids.
pub type Relids = BitmapSet;

impl BitmapSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(member: usize) -> Self {
        let mut set = Self::new();
        set.add_member(member);
        set
    }

    pub fn from_members(members: impl IntoIterator<Item = usize>) -> Self {
        let mut set = Self::new();
        for m in members {
            set.add_member(m);
        }
        set
    }

    pub fn add_member(&mut self, member: usize) {
        if member >= self.bits.len() {
            self.bits.grow(member + 1);
        }
        self.bits.insert(member);
    }

    pub fn is_member(&self, member: usize) -> bool {
        self.bits.contains(member)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_clear()
    }

    pub fn num_members(&self) -> usize {
        self.bits.count_ones(..)
    }

    /// Members in ascending order.
    pub fn members(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.ones()
    }

    pub fn union(&self, other: &BitmapSet) -> BitmapSet {
        let mut bits = self.bits.clone();
        if other.bits.len() > bits.len() {
            bits.grow(other.bits.len());
        }
        bits.union_with(&other.bits);
        BitmapSet { bits }
    }

    pub fn intersect(&self, other: &BitmapSet) -> BitmapSet {
        BitmapSet::from_members(self.members().filter(|m| other.is_member(*m)))
    }

    pub fn difference(&self, other: &BitmapSet) -> BitmapSet {
        BitmapSet::from_members(self.members().filter(|m| !other.is_member(*m)))
    }

    pub fn overlap(&self, other: &BitmapSet) -> bool {
        self.members().any(|m| other.is_member(m))
    }

    pub fn is_subset(&self, other: &BitmapSet) -> bool {
        self.members().all(|m| other.is_member(m))
    }

    /// True if `self` has at least one member that `other` lacks.
    pub fn nonempty_difference(&self, other: &BitmapSet) -> bool {
        !self.is_subset(other)
    }
}

impl PartialEq for BitmapSet {
    fn eq(&self, other: &Self) -> bool {
        self.members().eq(other.members())
    }
}

impl Eq for BitmapSet {}

impl Hash for BitmapSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for m in self.members() {
            m.hash(state);
        }
    }
}

impl fmt::Debug for BitmapSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.members()).finish()
    }
}

impl FromIterator<usize> for BitmapSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        BitmapSet::from_members(iter)
    }
}
