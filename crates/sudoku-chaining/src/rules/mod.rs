//! Baseline auxiliary pattern rules consulted by the advanced extension:
//! locking (pointing/claiming), naked and hidden pairs, and basic fish.
//!
//! Each rule reports its deductions as [`PatternHint`]s carrying the cells
//! and values whose eliminations the pattern depends on, so the chaining
//! engine can recover the rule's parents against its snapshot grid.

mod fisherman;
mod locking;
mod subsets;

pub use fisherman::Fisherman;
pub use locking::Locking;
pub use subsets::{HiddenSet, NakedSet};

use crate::grid::BitSet;

/// Collect `(cell, values)` eliminations, skipping empty entries.
pub(crate) struct RemovableBuilder {
    entries: Vec<(u8, BitSet)>,
}

impl RemovableBuilder {
    pub fn new() -> Self {
        RemovableBuilder {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, cell: usize, value: u8) {
        let cell = cell as u8;
        match self.entries.iter().position(|&(c, _)| c == cell) {
            Some(i) => self.entries[i].1.insert(value),
            None => self.entries.push((cell, BitSet::singleton(value))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> Vec<(u8, BitSet)> {
        self.entries
    }
}
