//! Typed chaining hints and the builders that materialize them from solved
//! implication graphs.
//!
//! A hint owns a shared reference to the task's [`ChainGraph`] so the proof
//! (the `parents` back-references) stays walkable after the engine returns.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::grid::{cell_col, cell_name, cell_row, peers, BitSet, Grid, Region};

use super::potential::{ChainGraph, NodeId, Potential, PotentialKey, PotentialSet};

/// A deduction produced by the chaining engine.
#[derive(Debug, Clone)]
pub struct ChainingHint {
    graph: Arc<ChainGraph>,
    removable: BTreeMap<u8, BitSet>,
    base_difficulty: f64,
    kind: ChainingHintKind,
}

#[derive(Debug, Clone)]
pub enum ChainingHintKind {
    /// A bidirectional cycle; `dst_off` heads the reversed traversal.
    Cycle {
        dst_on: NodeId,
        dst_off: NodeId,
        is_x: bool,
        is_y: bool,
    },
    /// A single-premise forcing chain ending in `target`.
    ForcingChain {
        target: NodeId,
        is_x: bool,
        is_y: bool,
    },
    /// Both assumptions on one candidate agree, or one of them is absurd.
    Binary {
        src: NodeId,
        dst_on: NodeId,
        dst_off: NodeId,
        is_absurd: bool,
        is_nishio: bool,
    },
    /// Every candidate of a cell forces the same outcome.
    CellReduction {
        cell: u8,
        chains: Vec<(u8, NodeId)>,
    },
    /// Every position of a value in a region forces the same outcome.
    RegionReduction {
        region: Region,
        value: u8,
        chains: Vec<(usize, NodeId)>,
    },
}

/// Hint contents gathered by a builder before the task's graph is frozen.
#[derive(Debug)]
pub(crate) struct ProtoHint {
    pub removable: BTreeMap<u8, BitSet>,
    pub base_difficulty: f64,
    pub kind: ChainingHintKind,
}

impl ProtoHint {
    /// A hint is worth reporting only if it removes something.
    pub fn is_worth(&self) -> bool {
        !self.removable.is_empty()
    }

    pub fn into_hint(self, graph: &Arc<ChainGraph>) -> ChainingHint {
        ChainingHint {
            graph: Arc::clone(graph),
            removable: self.removable,
            base_difficulty: self.base_difficulty,
            kind: self.kind,
        }
    }
}

impl ChainingHint {
    /// Candidates this hint eliminates, keyed by cell.
    pub fn removable_potentials(&self) -> &BTreeMap<u8, BitSet> {
        &self.removable
    }

    pub fn kind(&self) -> &ChainingHintKind {
        &self.kind
    }

    pub fn graph(&self) -> &ChainGraph {
        &self.graph
    }

    /// Terminal nodes of each implication chain this hint relies on.
    pub fn chain_targets(&self) -> Vec<NodeId> {
        match &self.kind {
            ChainingHintKind::Cycle { dst_on, dst_off, .. } => vec![*dst_on, *dst_off],
            ChainingHintKind::ForcingChain { target, .. } => vec![*target],
            ChainingHintKind::Binary { dst_on, dst_off, .. } => vec![*dst_on, *dst_off],
            ChainingHintKind::CellReduction { chains, .. } => {
                chains.iter().map(|&(_, id)| id).collect()
            }
            ChainingHintKind::RegionReduction { chains, .. } => {
                chains.iter().map(|&(_, id)| id).collect()
            }
        }
    }

    /// Total node count across the hint's chains; shorter proofs sort first.
    pub fn complexity(&self) -> usize {
        self.chain_targets()
            .iter()
            .map(|&id| self.graph.ancestor_count(id))
            .sum()
    }

    /// Canonical tie-break key: identity of the primary chain target.
    pub fn sort_key(&self) -> i32 {
        let (cell, value, is_on) = match self.chain_targets().first() {
            Some(&id) => self.graph.key(id),
            None => (0, 0, false),
        };
        (cell as i32) * 32 + (value as i32) * 2 + is_on as i32
    }

    /// Rating of this hint: the engine's base difficulty plus a penalty that
    /// grows with chain length.
    pub fn difficulty(&self) -> f64 {
        self.base_difficulty + length_difficulty(self.complexity())
    }

    /// Whether this deduction only used X-links (single-digit reasoning).
    pub fn is_x_chain(&self) -> bool {
        match self.kind {
            ChainingHintKind::Cycle { is_x, .. } => is_x,
            ChainingHintKind::ForcingChain { is_x, .. } => is_x,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            ChainingHintKind::Cycle { is_x, is_y, .. } => match (*is_x, *is_y) {
                (true, true) => "Bidirectional XY-Cycle",
                (true, false) => "Bidirectional X-Cycle",
                _ => "Bidirectional Y-Cycle",
            },
            ChainingHintKind::ForcingChain { is_x, is_y, .. } => match (*is_x, *is_y) {
                (true, true) => "Forcing XY-Chain",
                (true, false) => "Forcing X-Chain",
                _ => "Forcing Y-Chain",
            },
            ChainingHintKind::Binary {
                is_absurd,
                is_nishio,
                ..
            } => {
                if *is_nishio {
                    "Nishio Forcing Chain"
                } else if *is_absurd {
                    "Contradiction Forcing Chain"
                } else {
                    "Double Forcing Chain"
                }
            }
            ChainingHintKind::CellReduction { .. } => "Cell Forcing Chain",
            ChainingHintKind::RegionReduction { .. } => "Region Forcing Chain",
        }
    }

    /// One-line summary used when this hint justifies a nested implication.
    pub fn description(&self) -> String {
        match &self.kind {
            ChainingHintKind::Cycle { dst_on, .. } => {
                let node = self.graph.node(*dst_on);
                format!(
                    "{} on {} around {}",
                    self.name(),
                    node.value,
                    cell_name(node.cell as usize)
                )
            }
            ChainingHintKind::ForcingChain { target, .. } => {
                format!("{}: {}", self.name(), self.graph.node(*target))
            }
            ChainingHintKind::Binary { src, dst_on, .. } => {
                format!(
                    "{} from {}: {}",
                    self.name(),
                    self.graph.node(*src),
                    self.graph.node(*dst_on)
                )
            }
            ChainingHintKind::CellReduction { cell, chains } => {
                let target = chains.first().map(|&(_, id)| self.graph.node(id));
                match target {
                    Some(t) => format!(
                        "{}: each candidate of {} implies {}",
                        self.name(),
                        cell_name(*cell as usize),
                        t
                    ),
                    None => self.name().to_string(),
                }
            }
            ChainingHintKind::RegionReduction {
                region,
                value,
                chains,
            } => {
                let target = chains.first().map(|&(_, id)| self.graph.node(id));
                match target {
                    Some(t) => format!(
                        "{}: each position of {} in {} implies {}",
                        self.name(),
                        value,
                        region,
                        t
                    ),
                    None => self.name().to_string(),
                }
            }
        }
    }

    /// Off-potentials of the outer chain this hint depends on: candidates
    /// present in `source` but already eliminated from `current` anywhere on
    /// the hint's proof chains. Empty means the hint holds on its own and is
    /// useless as a nested implication.
    pub fn rule_parents(&self, source: &Grid, current: &Grid) -> Vec<PotentialKey> {
        let mut result = Vec::new();
        let mut seen_keys: HashSet<PotentialKey> = HashSet::new();
        // Targets may share identity yet differ in parents; walk each chain.
        for target in self.chain_targets() {
            let mut done: HashSet<NodeId> = HashSet::new();
            let mut stack = vec![target];
            while let Some(id) = stack.pop() {
                if !done.insert(id) {
                    continue;
                }
                let node = self.graph.node(id);
                let (cell, value) = (node.cell as usize, node.value);
                if source.has_candidate(cell, value) && !current.has_candidate(cell, value) {
                    let key = (node.cell, node.value, false);
                    if seen_keys.insert(key) {
                        result.push(key);
                    }
                }
                for &parent in &node.parents {
                    stack.push(parent);
                }
            }
        }
        result
    }

    /// Structural identity used to drop duplicate hints after sorting.
    pub(crate) fn dedup_key(&self) -> HintDedupKey {
        let (tag, flags) = match &self.kind {
            ChainingHintKind::Cycle { is_x, is_y, .. } => (0u8, (*is_x, *is_y)),
            ChainingHintKind::ForcingChain { is_x, is_y, .. } => (1, (*is_x, *is_y)),
            ChainingHintKind::Binary {
                is_absurd,
                is_nishio,
                ..
            } => (2, (*is_absurd, *is_nishio)),
            ChainingHintKind::CellReduction { .. } => (3, (false, false)),
            ChainingHintKind::RegionReduction { .. } => (4, (false, false)),
        };
        HintDedupKey {
            tag,
            flags,
            removable: self
                .removable
                .iter()
                .map(|(&cell, &values)| (cell, values.bits()))
                .collect(),
            targets: self
                .chain_targets()
                .iter()
                .map(|&id| self.graph.key(id))
                .collect(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub(crate) struct HintDedupKey {
    tag: u8,
    flags: (bool, bool),
    removable: Vec<(u8, u16)>,
    targets: Vec<PotentialKey>,
}

/// Chain-length rating penalty: +0.1 per step of the alternating
/// *3/2, *4/3 ceiling ladder starting at 4.
fn length_difficulty(length: usize) -> f64 {
    let mut added = 0.0;
    let mut ceiling = 4usize;
    let mut grow_fast = true;
    while length > ceiling {
        added += 0.1;
        ceiling = if grow_fast {
            ceiling * 3 / 2
        } else {
            ceiling * 4 / 3
        };
        grow_fast = !grow_fast;
    }
    added
}

fn add_removable(map: &mut BTreeMap<u8, BitSet>, cell: u8, value: u8) {
    map.entry(cell).or_insert_with(BitSet::empty).insert(value);
}

/// Rebuild the cycle in the opposite direction: polarity of every node is
/// flipped and explanations shift one step along the chain. Returns the head
/// of the reversed chain.
pub(crate) fn reversed_cycle(graph: &mut ChainGraph, org: NodeId) -> NodeId {
    let mut flipped: Vec<(u8, u8, bool, super::potential::Cause, String)> = Vec::new();
    let mut carried = String::new();
    let mut current = Some(org);
    while let Some(id) = current {
        let node = graph.node(id);
        flipped.push((node.cell, node.value, !node.is_on, node.cause, carried));
        carried = node.explanation.clone();
        current = node.parents.first().copied();
    }
    let mut prev: Option<NodeId> = None;
    for (cell, value, is_on, cause, explanation) in flipped {
        let potential = Potential {
            cell,
            value,
            is_on,
            cause,
            explanation,
            nested: None,
            parents: prev.map(|id| vec![id]).unwrap_or_default(),
        };
        prev = Some(graph.add(potential));
    }
    prev.expect("cycle has at least one node")
}

/// Build a cycle hint: removable candidates are those outside the cycle that
/// are cancelled by both traversal directions.
pub(crate) fn create_cycle_hint(
    grid: &Grid,
    graph: &mut ChainGraph,
    dst_on: NodeId,
    is_y: bool,
    is_x: bool,
) -> ProtoHint {
    debug_assert!(graph.node(dst_on).is_on);

    let mut cycle_cells: HashSet<u8> = HashSet::new();
    let mut p = dst_on;
    while let Some(&parent) = graph.node(p).parents.first() {
        cycle_cells.insert(graph.node(p).cell);
        p = parent;
    }
    debug_assert_eq!(graph.key(p), graph.key(dst_on));

    let mut cancel_forward: HashSet<(u8, u8)> = HashSet::new();
    let mut cancel_backward: HashSet<(u8, u8)> = HashSet::new();
    let mut p = dst_on;
    while let Some(&parent) = graph.node(p).parents.first() {
        let node = graph.node(p);
        for peer in peers(node.cell as usize) {
            if !cycle_cells.contains(&(peer as u8)) && grid.has_candidate(peer, node.value) {
                if node.is_on {
                    cancel_forward.insert((peer as u8, node.value));
                } else {
                    cancel_backward.insert((peer as u8, node.value));
                }
            }
        }
        p = parent;
    }

    let mut removable = BTreeMap::new();
    for &(cell, value) in cancel_forward.intersection(&cancel_backward) {
        add_removable(&mut removable, cell, value);
    }

    let dst_off = reversed_cycle(graph, dst_on);
    ProtoHint {
        removable,
        base_difficulty: if is_x && is_y { 7.0 } else { 6.5 },
        kind: ChainingHintKind::Cycle {
            dst_on,
            dst_off,
            is_x,
            is_y,
        },
    }
}

/// Build a forcing-chain hint: an "off" target removes that candidate, an
/// "on" target removes every other candidate of its cell.
pub(crate) fn create_forcing_chain_hint(
    grid: &Grid,
    graph: &ChainGraph,
    target: NodeId,
    is_y: bool,
    is_x: bool,
) -> ProtoHint {
    let node = graph.node(target);
    let mut removable = BTreeMap::new();
    if !node.is_on {
        add_removable(&mut removable, node.cell, node.value);
    } else {
        for value in grid.candidates(node.cell as usize).iter() {
            if value != node.value {
                add_removable(&mut removable, node.cell, value);
            }
        }
    }
    ProtoHint {
        removable,
        base_difficulty: if is_x && is_y { 7.0 } else { 6.6 },
        kind: ChainingHintKind::ForcingChain { target, is_x, is_y },
    }
}

/// Binary hint forcing `target` on: every other candidate of its cell goes.
pub(crate) fn create_binary_on_hint(
    grid: &Grid,
    graph: &ChainGraph,
    dst_on: NodeId,
    dst_off: NodeId,
    src: NodeId,
    target: NodeId,
    is_absurd: bool,
    is_nishio: bool,
    base_difficulty: f64,
) -> ProtoHint {
    let node = graph.node(target);
    let mut removable = BTreeMap::new();
    for value in grid.candidates(node.cell as usize).iter() {
        if value != node.value {
            add_removable(&mut removable, node.cell, value);
        }
    }
    ProtoHint {
        removable,
        base_difficulty,
        kind: ChainingHintKind::Binary {
            src,
            dst_on,
            dst_off,
            is_absurd,
            is_nishio,
        },
    }
}

/// Binary hint forcing `target` off: that candidate goes.
pub(crate) fn create_binary_off_hint(
    graph: &ChainGraph,
    dst_on: NodeId,
    dst_off: NodeId,
    src: NodeId,
    target: NodeId,
    is_absurd: bool,
    is_nishio: bool,
    base_difficulty: f64,
) -> ProtoHint {
    let node = graph.node(target);
    let mut removable = BTreeMap::new();
    add_removable(&mut removable, node.cell, node.value);
    ProtoHint {
        removable,
        base_difficulty,
        kind: ChainingHintKind::Binary {
            src,
            dst_on,
            dst_off,
            is_absurd,
            is_nishio,
        },
    }
}

fn reduction_removable(grid: &Grid, graph: &ChainGraph, target: NodeId) -> BTreeMap<u8, BitSet> {
    let node = graph.node(target);
    let mut removable = BTreeMap::new();
    if node.is_on {
        for value in grid.candidates(node.cell as usize).iter() {
            if value != node.value {
                add_removable(&mut removable, node.cell, value);
            }
        }
    } else {
        add_removable(&mut removable, node.cell, node.value);
    }
    removable
}

/// Cell reduction: every candidate of `cell` forces the target's identity;
/// one chain per candidate value, taken from that value's outcome set so the
/// parents match the branch.
pub(crate) fn create_cell_reduction_hint(
    grid: &Grid,
    graph: &ChainGraph,
    cell: usize,
    target: NodeId,
    outcomes: &BTreeMap<u8, PotentialSet>,
    base_difficulty: f64,
) -> ProtoHint {
    let target_key = graph.key(target);
    let mut chains = Vec::new();
    for value in 1..=9u8 {
        if grid.has_candidate(cell, value) {
            let branch_target = outcomes
                .get(&value)
                .and_then(|set| set.get(target_key))
                .expect("reduction target missing from branch outcome");
            chains.push((value, branch_target));
        }
    }
    ProtoHint {
        removable: reduction_removable(grid, graph, target),
        base_difficulty,
        kind: ChainingHintKind::CellReduction {
            cell: cell as u8,
            chains,
        },
    }
}

/// Region reduction: every possible position of `value` in `region` forces
/// the target's identity.
pub(crate) fn create_region_reduction_hint(
    grid: &Grid,
    graph: &ChainGraph,
    region: Region,
    value: u8,
    target: NodeId,
    outcomes: &BTreeMap<usize, PotentialSet>,
    base_difficulty: f64,
) -> ProtoHint {
    let target_key = graph.key(target);
    let mut chains = Vec::new();
    for (&position, outcome) in outcomes {
        let branch_target = outcome
            .get(target_key)
            .expect("reduction target missing from branch outcome");
        chains.push((position, branch_target));
    }
    ProtoHint {
        removable: reduction_removable(grid, graph, target),
        base_difficulty,
        kind: ChainingHintKind::RegionReduction {
            region,
            value,
            chains,
        },
    }
}

/// Canonical ordering for removable-candidate cells: column, then row, then
/// the cell's smallest remaining candidate.
pub(crate) fn canonical_cell_order(grid: &Grid, a: u8, b: u8) -> std::cmp::Ordering {
    let (a, b) = (a as usize, b as usize);
    cell_col(a)
        .cmp(&cell_col(b))
        .then(cell_row(a).cmp(&cell_row(b)))
        .then(
            grid.candidates(a)
                .smallest()
                .unwrap_or(0)
                .cmp(&grid.candidates(b).smallest().unwrap_or(0)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaining::potential::Cause;

    #[test]
    fn length_penalty_grows_with_ladder() {
        assert_eq!(length_difficulty(4), 0.0);
        assert!((length_difficulty(5) - 0.1).abs() < 1e-9);
        assert!((length_difficulty(7) - 0.2).abs() < 1e-9);
        assert!(length_difficulty(50) > length_difficulty(20));
    }

    #[test]
    fn reversed_cycle_flips_polarity_and_terminates() {
        let mut graph = ChainGraph::new();
        // Source r1c1=4 -> r1c9<>4 -> r9c9=4 -> loop closure node equal to source.
        let source = graph.add(Potential::new(0, 4, true));
        let off = graph.add(Potential::with_parent(8, 4, false, source, Cause::HiddenRow, "row"));
        let on = graph.add(Potential::with_parent(80, 4, true, off, Cause::HiddenColumn, "col"));
        let closure = graph.add(Potential::with_parent(0, 4, true, on, Cause::HiddenRow, "back"));

        let head = reversed_cycle(&mut graph, closure);
        // Head has the source's identity, flipped.
        assert_eq!(graph.key(head), (0, 4, false));
        // Walk the reversed chain: polarities alternate, same cells visited
        // in the opposite order, and the walk ends at the flipped closure.
        let mut ids = Vec::new();
        let mut cur = Some(head);
        while let Some(id) = cur {
            ids.push(graph.key(id));
            cur = graph.node(id).parents.first().copied();
        }
        assert_eq!(
            ids,
            vec![(0, 4, false), (8, 4, true), (80, 4, false), (0, 4, false)]
        );
    }

    #[test]
    fn forcing_chain_hint_on_target_removes_other_candidates() {
        let mut grid = Grid::empty();
        for v in [1, 2, 5, 9] {
            grid.remove_candidate(40, v);
        }
        let mut graph = ChainGraph::new();
        let target = graph.add(Potential::new(40, 7, true));
        let proto = create_forcing_chain_hint(&grid, &graph, target, true, true);
        let removable = &proto.removable;
        assert_eq!(removable.len(), 1);
        let values: Vec<u8> = removable[&40].iter().collect();
        assert_eq!(values, vec![3, 4, 6, 8]);
        assert!(proto.is_worth());
    }

    #[test]
    fn binary_off_hint_removes_single_candidate() {
        let graph = {
            let mut g = ChainGraph::new();
            g.add(Potential::new(13, 6, false));
            g
        };
        let proto = create_binary_off_hint(&graph, 0, 0, 0, 0, true, false, 8.5);
        assert_eq!(proto.removable[&13], BitSet::singleton(6));
    }

    #[test]
    fn canonical_order_is_column_major() {
        let grid = Grid::empty();
        // r5c2 before r1c4 (column first), r1c4 before r2c4 (then row).
        assert_eq!(
            canonical_cell_order(&grid, 37, 3),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            canonical_cell_order(&grid, 3, 12),
            std::cmp::Ordering::Less
        );
    }
}
