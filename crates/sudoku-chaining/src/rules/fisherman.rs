//! Basic fish (X-Wing): a value locked to the same two columns in two rows
//! is excluded from the rest of those columns, and transposed.

use crate::chaining::{PatternHint, RuleHint, RuleProducer};
use crate::error::ChainingError;
use crate::grid::{mask_positions, BitSet, Grid, Region, RegionKind};

use super::RemovableBuilder;

pub struct Fisherman {
    degree: usize,
}

impl Fisherman {
    pub fn new(degree: usize) -> Fisherman {
        debug_assert_eq!(degree, 2, "only X-Wings are used by the chaining stack");
        Fisherman { degree }
    }

    fn search(
        &self,
        grid: &Grid,
        base_kind: RegionKind,
        cover_kind: RegionKind,
        accu: &mut dyn FnMut(RuleHint),
    ) {
        for value in 1..=9u8 {
            for first in 0..9 {
                let base1 = Region {
                    kind: base_kind,
                    index: first,
                };
                let mask1 = base1.potential_positions(grid, value);
                if mask1.count_ones() != 2 {
                    continue;
                }
                for second in (first + 1)..9 {
                    let base2 = Region {
                        kind: base_kind,
                        index: second,
                    };
                    if base2.potential_positions(grid, value) != mask1 {
                        continue;
                    }
                    let mut removable = RemovableBuilder::new();
                    for position in mask_positions(mask1) {
                        let cover = Region {
                            kind: cover_kind,
                            index: position,
                        };
                        for cell in cover.cells() {
                            let base_index = match base_kind {
                                RegionKind::Row => cell / 9,
                                _ => cell % 9,
                            };
                            if base_index != first
                                && base_index != second
                                && grid.has_candidate(cell, value)
                            {
                                removable.add(cell, value);
                            }
                        }
                    }
                    if removable.is_empty() {
                        continue;
                    }
                    let mut parent_cells: Vec<u8> =
                        base1.cells().iter().map(|&c| c as u8).collect();
                    parent_cells.extend(base2.cells().iter().map(|&c| c as u8));
                    accu(RuleHint::Pattern(PatternHint {
                        description: format!(
                            "X-Wing: {} in {} and {}",
                            value, base1, base2
                        ),
                        removable: removable.build(),
                        parent_cells,
                        parent_values: BitSet::singleton(value),
                    }));
                }
            }
        }
    }
}

impl RuleProducer for Fisherman {
    fn name(&self) -> String {
        format!("Fisherman ({})", self.degree)
    }

    fn produce_hints(
        &mut self,
        grid: &Grid,
        accu: &mut dyn FnMut(RuleHint),
    ) -> Result<(), ChainingError> {
        self.search(grid, RegionKind::Row, RegionKind::Column, accu);
        self.search(grid, RegionKind::Column, RegionKind::Row, accu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_x_wing() {
        let mut grid = Grid::empty();
        // 7 locked to columns 3 and 8 in rows 2 and 6.
        for col in [0, 1, 3, 4, 5, 6, 8] {
            grid.remove_candidate(9 + col, 7);
            grid.remove_candidate(45 + col, 7);
        }
        let mut hints = Vec::new();
        Fisherman::new(2)
            .produce_hints(&grid, &mut |h| hints.push(h))
            .unwrap();
        let hint = hints
            .iter()
            .find(|h| h.description() == "X-Wing: 7 in row 2 and row 6")
            .expect("row X-Wing on 7");
        // 7 falls out of columns 3 and 8 in the other seven rows.
        let removable = hint.removable_potentials();
        assert_eq!(removable.len(), 14);
        for (cell, values) in removable {
            let (row, col) = (cell as usize / 9, cell as usize % 9);
            assert!(col == 2 || col == 7);
            assert!(row != 1 && row != 5);
            assert_eq!(values, BitSet::singleton(7));
        }
    }
}
