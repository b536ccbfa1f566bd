//! Immediate implications of a potential and the breadth-first propagator
//! that saturates the "on" and "off" frontiers.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::error::ChainingError;
use crate::grid::{Grid, Region, RegionKind};

use super::potential::{ChainGraph, NodeId, Potential, PotentialSet};
use super::{Chaining, ChainingMode};
use crate::chaining::potential::Cause;

impl Chaining {
    /// Potentials that must be "off" when `p` is "on": the cell's other
    /// candidates (Y-link, if enabled) and the value's other positions in
    /// each region containing the cell (X-link). Cells reachable through
    /// both the block and a line are reported once, for the block.
    pub(crate) fn on_to_off(
        &self,
        grid: &Grid,
        graph: &mut ChainGraph,
        p: NodeId,
        y_enabled: bool,
    ) -> Vec<NodeId> {
        let node = graph.node(p);
        let (cell, value) = (node.cell as usize, node.value);
        let mut result = Vec::new();

        if y_enabled {
            // Other candidate values of this cell get off.
            for v in grid.candidates(cell).iter() {
                if v != value {
                    result.push(graph.add(Potential::with_parent(
                        cell,
                        v,
                        false,
                        p,
                        Cause::NakedSingle,
                        "the cell can contain only one value",
                    )));
                }
            }
        }

        // Other positions of this value get off, block edges first.
        let block = Region::at(RegionKind::Block, cell);
        for kind in RegionKind::ALL {
            let region = Region::at(kind, cell);
            for other in region.cells() {
                if other == cell {
                    continue;
                }
                if kind != RegionKind::Block && block.contains(other) {
                    continue;
                }
                if grid.has_candidate(other, value) {
                    result.push(graph.add(Potential::with_parent(
                        other,
                        value,
                        false,
                        p,
                        Cause::for_region(kind),
                        format!("the value can occur only once in the {}", region),
                    )));
                }
            }
        }
        result
    }

    /// Potentials that must be "on" when `p` is "off": the cell's only other
    /// candidate (Y-link) and the value's only other position per region
    /// (X-link), each annotated with the hidden parents whose earlier
    /// eliminations enabled the inference.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn off_to_on(
        &self,
        grid: &Grid,
        source: &Grid,
        graph: &mut ChainGraph,
        off_potentials: &PotentialSet,
        p: NodeId,
        y_enabled: bool,
        x_enabled: bool,
    ) -> Result<PotentialSet, ChainingError> {
        let node = graph.node(p);
        let (cell, value) = (node.cell as usize, node.value);
        let mut result = PotentialSet::new();

        if y_enabled {
            // If the cell is down to two candidates, the other one gets on.
            let candidates = grid.candidates(cell);
            if candidates.count() == 2 {
                let mut other = candidates.smallest().expect("two candidates present");
                if other == value {
                    other = candidates
                        .iter()
                        .find(|&v| v != value)
                        .expect("two candidates present");
                }
                let mut parents = vec![p];
                add_hidden_parents_of_cell(
                    &mut parents,
                    cell,
                    grid,
                    source,
                    off_potentials,
                )?;
                let p_on = graph.add(Potential {
                    cell: cell as u8,
                    value: other,
                    is_on: true,
                    cause: Cause::NakedSingle,
                    explanation: "only remaining possible value in the cell".to_string(),
                    nested: None,
                    parents,
                });
                result.insert(graph, p_on);
            }
        }

        if x_enabled {
            // If the value has exactly one other position in a region
            // containing the cell, that position gets on.
            for kind in RegionKind::ALL {
                let region = Region::at(kind, cell);
                let mut other_cell: Option<usize> = None;
                for region_cell in region.cells() {
                    if region_cell == cell {
                        continue;
                    }
                    if grid.has_candidate(region_cell, value) {
                        if other_cell.is_some() {
                            other_cell = None;
                            break;
                        }
                        other_cell = Some(region_cell);
                    }
                }
                let Some(other) = other_cell else { continue };

                let mut parents = vec![p];
                add_hidden_parents_of_region(
                    &mut parents,
                    value,
                    region,
                    grid,
                    source,
                    off_potentials,
                )?;
                let p_on = Potential {
                    cell: other as u8,
                    value,
                    is_on: true,
                    cause: Cause::for_region(kind),
                    explanation: format!("only remaining possible position in the {}", region),
                    nested: None,
                    parents,
                };
                let key = p_on.key();
                match result.get(key) {
                    None => {
                        let id = graph.add(p_on);
                        result.insert(graph, id);
                    }
                    Some(existing) if self.settings.mode == ChainingMode::Deterministic => {
                        // Several regions vote for the same conjugate; keep
                        // the shortest derivation.
                        let id = graph.add(p_on);
                        if graph.ancestor_count(id) < graph.ancestor_count(existing) {
                            result.remove(key);
                            result.insert(graph, id);
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(result)
    }

    /// Saturate `to_on` / `to_off` with every consequence of the initial
    /// assumptions. Returns the contradiction pair if some potential would
    /// have to be both on and off; `None` when the closure is consistent.
    ///
    /// The working grid is a scratch buffer for the duration of this call:
    /// it is snapshotted on entry and restored on every exit path.
    pub(crate) fn do_chaining(
        &mut self,
        grid: &mut Grid,
        graph: &mut ChainGraph,
        to_on: &mut PotentialSet,
        to_off: &mut PotentialSet,
    ) -> Result<Option<(NodeId, NodeId)>, ChainingError> {
        let save = grid.clone();
        let result = self.saturate(grid, &save, graph, to_on, to_off);
        grid.copy_from(&save);
        result
    }

    fn saturate(
        &mut self,
        grid: &mut Grid,
        save: &Grid,
        graph: &mut ChainGraph,
        to_on: &mut PotentialSet,
        to_off: &mut PotentialSet,
    ) -> Result<Option<(NodeId, NodeId)>, ChainingError> {
        let mut pending_on: VecDeque<NodeId> = to_on.iter().collect();
        let mut pending_off: VecDeque<NodeId> = to_off.iter().collect();
        let mut contradictions: Vec<(NodeId, NodeId)> = Vec::new();

        while !pending_on.is_empty() || !pending_off.is_empty() {
            if let Some(p) = pending_on.pop_front() {
                let make_off = self.on_to_off(grid, graph, p, !self.nishio);
                for p_off in make_off {
                    let (cell, value, _) = graph.key(p_off);
                    if let Some(p_on) = to_on.get((cell, value, true)) {
                        // Contradiction found.
                        if self.settings.mode == ChainingMode::Legacy {
                            return Ok(Some((p_on, p_off)));
                        }
                        contradictions.push((p_on, p_off));
                    } else if !to_off.contains((cell, value, false)) {
                        to_off.insert(graph, p_off);
                        pending_off.push_back(p_off);
                    }
                }
            } else if let Some(p) = pending_off.pop_front() {
                let make_on =
                    self.off_to_on(grid, save, graph, to_off, p, !self.nishio, true)?;
                if self.dynamic {
                    // Apply the elimination so downstream inferences see the
                    // reduced candidate set.
                    let node = graph.node(p);
                    grid.remove_candidate(node.cell as usize, node.value);
                }
                for p_on in make_on.iter() {
                    let (cell, value, _) = graph.key(p_on);
                    if let Some(p_off) = to_off.get((cell, value, false)) {
                        // Contradiction found.
                        if self.settings.mode == ChainingMode::Legacy {
                            return Ok(Some((p_on, p_off)));
                        }
                        contradictions.push((p_on, p_off));
                    } else if !to_on.contains((cell, value, true)) {
                        to_on.insert(graph, p_on);
                        pending_on.push_back(p_on);
                    }
                }
            }

            if !contradictions.is_empty() {
                // Report the shortest contradiction of the sweep.
                let best = contradictions
                    .iter()
                    .copied()
                    .min_by_key(|&(on, off)| {
                        graph.ancestor_count(on) + graph.ancestor_count(off)
                    })
                    .expect("non-empty contradiction list");
                debug!(
                    "contradiction on {} ({} candidates in sweep)",
                    graph.node(best.0),
                    contradictions.len()
                );
                return Ok(Some(best));
            }

            if self.level > 0 && pending_on.is_empty() && pending_off.is_empty() {
                let advanced = self.advanced_potentials(grid, save, graph, to_off)?;
                if !advanced.is_empty() {
                    trace!("advanced extension injected {} implications", advanced.len());
                }
                for p_off in advanced {
                    let key = graph.key(p_off);
                    if !to_off.contains(key) {
                        to_off.insert(graph, p_off);
                        pending_off.push_back(p_off);
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Hidden parents of a cell-rule inference: candidates of the cell present in
/// the pre-propagation snapshot but already eliminated from the working grid.
fn add_hidden_parents_of_cell(
    parents: &mut Vec<NodeId>,
    cell: usize,
    grid: &Grid,
    source: &Grid,
    off_potentials: &PotentialSet,
) -> Result<(), ChainingError> {
    for value in 1..=9u8 {
        if source.has_candidate(cell, value) && !grid.has_candidate(cell, value) {
            let parent = off_potentials
                .get((cell as u8, value, false))
                .ok_or(ChainingError::MissingParent { cell, value })?;
            parents.push(parent);
        }
    }
    Ok(())
}

/// Hidden parents of a region-rule inference: positions of the value removed
/// from the region since the snapshot.
fn add_hidden_parents_of_region(
    parents: &mut Vec<NodeId>,
    value: u8,
    region: Region,
    grid: &Grid,
    source: &Grid,
    off_potentials: &PotentialSet,
) -> Result<(), ChainingError> {
    let current = region.potential_positions(grid, value);
    let removed = region.potential_positions(source, value) & !current;
    for position in crate::grid::mask_positions(removed) {
        let cell = region.cell(position);
        let parent = off_potentials
            .get((cell as u8, value, false))
            .ok_or(ChainingError::MissingParent { cell, value })?;
        parents.push(parent);
    }
    Ok(())
}
