//! Naked and hidden pair rules.

use crate::chaining::{PatternHint, RuleHint, RuleProducer};
use crate::error::ChainingError;
use crate::grid::{mask_positions, BitSet, Grid, Region, RegionKind};

use super::RemovableBuilder;

fn all_regions() -> impl Iterator<Item = Region> {
    RegionKind::ALL
        .into_iter()
        .flat_map(|kind| (0..9).map(move |index| Region { kind, index }))
}

/// Naked set: N cells of a region sharing the same N candidates exclude
/// those values from the region's other cells.
pub struct NakedSet {
    degree: usize,
}

impl NakedSet {
    pub fn new(degree: usize) -> NakedSet {
        debug_assert_eq!(degree, 2, "only pairs are used by the chaining stack");
        NakedSet { degree }
    }
}

impl RuleProducer for NakedSet {
    fn name(&self) -> String {
        format!("Naked Set ({})", self.degree)
    }

    fn produce_hints(
        &mut self,
        grid: &Grid,
        accu: &mut dyn FnMut(RuleHint),
    ) -> Result<(), ChainingError> {
        for region in all_regions() {
            let cells = region.cells();
            for i in 0..9 {
                for j in (i + 1)..9 {
                    let (a, b) = (cells[i], cells[j]);
                    if !grid.is_empty_cell(a) || !grid.is_empty_cell(b) {
                        continue;
                    }
                    let union = grid.candidates(a).union(grid.candidates(b));
                    if union.count() != 2
                        || grid.candidates(a).count() < 2
                        || grid.candidates(b).count() < 2
                    {
                        continue;
                    }
                    let mut removable = RemovableBuilder::new();
                    for cell in cells {
                        if cell == a || cell == b {
                            continue;
                        }
                        for value in union.iter() {
                            if grid.has_candidate(cell, value) {
                                removable.add(cell, value);
                            }
                        }
                    }
                    if removable.is_empty() {
                        continue;
                    }
                    let values: Vec<u8> = union.iter().collect();
                    accu(RuleHint::Pattern(PatternHint {
                        description: format!(
                            "Naked Pair: {}/{} in {}",
                            values[0], values[1], region
                        ),
                        removable: removable.build(),
                        parent_cells: vec![a as u8, b as u8],
                        parent_values: union,
                    }));
                }
            }
        }
        Ok(())
    }
}

/// Hidden set: N values restricted to the same N cells of a region clear the
/// other candidates of those cells.
pub struct HiddenSet {
    degree: usize,
}

impl HiddenSet {
    pub fn new(degree: usize) -> HiddenSet {
        debug_assert_eq!(degree, 2, "only pairs are used by the chaining stack");
        HiddenSet { degree }
    }
}

impl RuleProducer for HiddenSet {
    fn name(&self) -> String {
        format!("Hidden Set ({})", self.degree)
    }

    fn produce_hints(
        &mut self,
        grid: &Grid,
        accu: &mut dyn FnMut(RuleHint),
    ) -> Result<(), ChainingError> {
        for region in all_regions() {
            for a in 1..=9u8 {
                let positions_a = region.potential_positions(grid, a);
                if positions_a.count_ones() != 2 {
                    continue;
                }
                for b in (a + 1)..=9u8 {
                    if region.potential_positions(grid, b) != positions_a {
                        continue;
                    }
                    let pair = BitSet::singleton(a).union(BitSet::singleton(b));
                    let mut removable = RemovableBuilder::new();
                    for position in mask_positions(positions_a) {
                        let cell = region.cell(position);
                        for value in grid.candidates(cell).difference(pair).iter() {
                            removable.add(cell, value);
                        }
                    }
                    if removable.is_empty() {
                        continue;
                    }
                    accu(RuleHint::Pattern(PatternHint {
                        description: format!("Hidden Pair: {}/{} in {}", a, b, region),
                        removable: removable.build(),
                        parent_cells: region.cells().iter().map(|&c| c as u8).collect(),
                        parent_values: pair,
                    }));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep_candidates(grid: &mut Grid, cell: usize, keep: &[u8]) {
        for v in 1..=9 {
            if !keep.contains(&v) {
                grid.remove_candidate(cell, v);
            }
        }
    }

    #[test]
    fn naked_pair_in_row() {
        let mut grid = Grid::empty();
        keep_candidates(&mut grid, 0, &[4, 9]);
        keep_candidates(&mut grid, 5, &[4, 9]);
        let mut hints = Vec::new();
        NakedSet::new(2)
            .produce_hints(&grid, &mut |h| hints.push(h))
            .unwrap();
        let hint = hints
            .iter()
            .find(|h| h.description() == "Naked Pair: 4/9 in row 1")
            .expect("naked pair in row 1");
        // 4 and 9 removed from the other seven cells of row 1.
        let removable = hint.removable_potentials();
        assert_eq!(removable.len(), 7);
        assert!(removable.iter().all(|(c, v)| {
            *c < 9 && v.iter().all(|x| x == 4 || x == 9)
        }));
    }

    #[test]
    fn hidden_pair_in_column() {
        let mut grid = Grid::empty();
        // 3 and 6 possible only in r2c1 and r8c1 within column 1.
        for row in [0, 2, 3, 4, 5, 6, 8] {
            grid.remove_candidate(row * 9, 3);
            grid.remove_candidate(row * 9, 6);
        }
        let mut hints = Vec::new();
        HiddenSet::new(2)
            .produce_hints(&grid, &mut |h| hints.push(h))
            .unwrap();
        let hint = hints
            .iter()
            .find(|h| h.description() == "Hidden Pair: 3/6 in column 1")
            .expect("hidden pair in column 1");
        // The pair cells lose their seven other candidates each.
        let removable = hint.removable_potentials();
        assert_eq!(removable.len(), 2);
        for (cell, values) in removable {
            assert!(cell == 9 || cell == 63);
            assert_eq!(values.count(), 7);
            assert!(!values.contains(3) && !values.contains(6));
        }
    }
}
