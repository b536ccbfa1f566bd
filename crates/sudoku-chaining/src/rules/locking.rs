//! Locking: a value confined to the intersection of a block and a line is
//! excluded from the rest of the other region (pointing and claiming).

use crate::chaining::{PatternHint, RuleHint, RuleProducer};
use crate::error::ChainingError;
use crate::grid::{mask_positions, BitSet, Grid, Region, RegionKind};

use super::RemovableBuilder;

pub struct Locking;

impl Locking {
    pub fn new() -> Locking {
        Locking
    }
}

impl RuleProducer for Locking {
    fn name(&self) -> String {
        "Pointing & Claiming".to_string()
    }

    fn produce_hints(
        &mut self,
        grid: &Grid,
        accu: &mut dyn FnMut(RuleHint),
    ) -> Result<(), ChainingError> {
        // Pointing: confinement within a block excludes from the line.
        for block_index in 0..9 {
            let block = Region {
                kind: RegionKind::Block,
                index: block_index,
            };
            for value in 1..=9u8 {
                let positions: Vec<usize> = mask_positions(block.potential_positions(grid, value))
                    .map(|p| block.cell(p))
                    .collect();
                if positions.len() < 2 {
                    continue;
                }
                for line_kind in [RegionKind::Row, RegionKind::Column] {
                    let line = Region::at(line_kind, positions[0]);
                    if !positions.iter().all(|&c| line.contains(c)) {
                        continue;
                    }
                    emit_locking(grid, accu, value, block, line);
                }
            }
        }

        // Claiming: confinement within a line excludes from the block.
        for line_kind in [RegionKind::Row, RegionKind::Column] {
            for index in 0..9 {
                let line = Region {
                    kind: line_kind,
                    index,
                };
                for value in 1..=9u8 {
                    let positions: Vec<usize> =
                        mask_positions(line.potential_positions(grid, value))
                            .map(|p| line.cell(p))
                            .collect();
                    if positions.len() < 2 {
                        continue;
                    }
                    let block = Region::at(RegionKind::Block, positions[0]);
                    if !positions.iter().all(|&c| block.contains(c)) {
                        continue;
                    }
                    emit_locking(grid, accu, value, line, block);
                }
            }
        }
        Ok(())
    }
}

/// Eliminate `value` from `target` outside `base`; parents are the base
/// region's vanished positions of the value.
fn emit_locking(
    grid: &Grid,
    accu: &mut dyn FnMut(RuleHint),
    value: u8,
    base: Region,
    target: Region,
) {
    let mut removable = RemovableBuilder::new();
    for cell in target.cells() {
        if !base.contains(cell) && grid.has_candidate(cell, value) {
            removable.add(cell, value);
        }
    }
    if removable.is_empty() {
        return;
    }
    accu(RuleHint::Pattern(PatternHint {
        description: format!("Locking: {} in {} confined to {}", value, base, target),
        removable: removable.build(),
        parent_cells: base.cells().iter().map(|&c| c as u8).collect(),
        parent_values: BitSet::singleton(value),
    }));
}
