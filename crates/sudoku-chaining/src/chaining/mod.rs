//! Chaining inference engine: bidirectional cycles and all flavors of
//! forcing chains (binary, cell, region, dynamic, nested).
//!
//! The engine assumes each candidate of each starting cell to be present
//! ("on") or absent ("off"), propagates the consequences through a
//! bidirectional implication graph, and reports eliminations justified by
//! contradictions, convergent outcomes, or closed loops.

mod advanced;
mod hints;
mod potential;
mod propagate;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::error::ChainingError;
use crate::grid::{mask_positions, Grid, Region, RegionKind};

pub use advanced::{PatternHint, RuleHint, RuleProducer};
pub use hints::{ChainingHint, ChainingHintKind};
pub use potential::{Cause, ChainGraph, NodeId, Potential, PotentialKey, PotentialSet};

use hints::{
    create_binary_off_hint, create_binary_on_hint, create_cell_reduction_hint,
    create_cycle_hint, create_forcing_chain_hint, create_region_reduction_hint, ProtoHint,
};

/// Receives the hints an engine produces.
pub trait HintSink {
    fn push(&mut self, hint: ChainingHint);
}

impl HintSink for Vec<ChainingHint> {
    fn push(&mut self, hint: ChainingHint) {
        Vec::push(self, hint);
    }
}

/// Ordering-hardening mode. `Deterministic` is the contract: repeated runs
/// on one puzzle yield identical chains. `Legacy` reproduces the historical
/// first-found behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainingMode {
    Legacy,
    Deterministic,
}

/// Engine-wide knobs supplied by the caller.
#[derive(Debug, Clone)]
pub struct Settings {
    pub num_threads: usize,
    pub mode: ChainingMode,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            mode: ChainingMode::Deterministic,
        }
    }
}

/// Everything a parallel worker needs to build its own engine.
#[derive(Clone)]
struct WorkerConfig {
    multiple: bool,
    dynamic: bool,
    nishio: bool,
    level: u32,
    nesting_limit: u32,
    settings: Settings,
    cancel: Option<Arc<AtomicBool>>,
}

/// The chaining engine. One instance per configuration; not shared across
/// threads (parallel search builds a fresh engine per worker).
pub struct Chaining {
    multiple: bool,
    dynamic: bool,
    nishio: bool,
    level: u32,
    parallel: bool,
    nesting_limit: u32,
    settings: Settings,
    cancel: Option<Arc<AtomicBool>>,
    /// Auxiliary rule stack, built lazily on first advanced lookup.
    other_rules: Option<Vec<Box<dyn RuleProducer>>>,
    /// Single-step memo: the previous grid and its hints.
    memo: Option<(Grid, Vec<ChainingHint>)>,
}

impl Chaining {
    /// Create the engine for searching forcing chains.
    ///
    /// `multiple` enables cell/region reductions, `dynamic` lets propagation
    /// edit the working grid, `nishio` restricts the search to per-candidate
    /// contradictions, `level` selects the advanced-extension depth.
    /// Parallel fan-out is only allowed from level 3 up.
    pub fn new(multiple: bool, dynamic: bool, nishio: bool, level: u32) -> Chaining {
        Chaining::with_options(multiple, dynamic, nishio, level, level >= 3, 0)
    }

    pub fn with_options(
        multiple: bool,
        dynamic: bool,
        nishio: bool,
        level: u32,
        parallel: bool,
        nesting_limit: u32,
    ) -> Chaining {
        Chaining {
            multiple,
            dynamic,
            nishio,
            level,
            parallel,
            nesting_limit,
            settings: Settings::default(),
            cancel: None,
            other_rules: None,
            memo: None,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Chaining {
        self.settings = settings;
        self
    }

    /// Install a cooperative cancellation flag, polled between sub-rule
    /// invocations.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Chaining {
        self.cancel = Some(flag);
        self
    }

    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_nishio(&self) -> bool {
        self.nishio
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Base rating of every hint this engine produces.
    ///
    /// Panics for a plain cycle engine (no multiple, dynamic, nishio or
    /// level): its hints rate themselves.
    pub fn get_difficulty(&self) -> f64 {
        if self.level >= 2 {
            9.5 + 0.5 * (self.level - 2) as f64
        } else if self.level > 0 {
            8.5 + 0.5 * self.level as f64
        } else if self.nishio {
            7.5
        } else if self.dynamic {
            8.5
        } else if self.multiple {
            8.0
        } else {
            panic!("difficulty is not defined for a plain cycle engine");
        }
    }

    /// Community name for hints of the simplest engines.
    pub fn get_common_name(&self, hint: &ChainingHint) -> Option<&'static str> {
        if !self.dynamic && !self.multiple {
            Some(if hint.is_x_chain() { "X-Chain" } else { "Y-Chain" })
        } else {
            None
        }
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), ChainingError> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(ChainingError::Cancelled),
            _ => Ok(()),
        }
    }

    /// A fresh engine for a nested rule: same settings, no fan-out.
    fn nested_engine(&self, multiple: bool, dynamic: bool, level: u32) -> Chaining {
        Chaining {
            multiple,
            dynamic,
            nishio: false,
            level,
            parallel: false,
            nesting_limit: 0,
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
            other_rules: None,
            memo: None,
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            multiple: self.multiple,
            dynamic: self.dynamic,
            nishio: self.nishio,
            level: self.level,
            nesting_limit: self.nesting_limit,
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
        }
    }

    fn from_worker_config(config: &WorkerConfig) -> Chaining {
        Chaining {
            multiple: config.multiple,
            dynamic: config.dynamic,
            nishio: config.nishio,
            level: config.level,
            parallel: false,
            nesting_limit: config.nesting_limit,
            settings: config.settings.clone(),
            cancel: config.cancel.clone(),
            other_rules: None,
            memo: None,
        }
    }

    // ==================== Entry points ====================

    /// Search `grid` and push every chaining hint found, sorted and
    /// deduplicated. An unchanged grid replays the previous result without
    /// re-running propagation.
    pub fn get_hints(
        &mut self,
        grid: &Grid,
        accu: &mut dyn HintSink,
    ) -> Result<(), ChainingError> {
        if let Some((last_grid, last_hints)) = &self.memo {
            if last_grid == grid {
                debug!("{}: replaying {} memoized hints", self, last_hints.len());
                for hint in last_hints {
                    accu.push(hint.clone());
                }
                return Ok(());
            }
        }
        let sorted = self.get_hint_list(grid)?;
        // Drop structural duplicates, keeping the first (shortest) instance.
        let mut seen = HashSet::new();
        let mut hints = Vec::with_capacity(sorted.len());
        for hint in sorted {
            if seen.insert(hint.dedup_key()) {
                hints.push(hint);
            }
        }
        self.memo = Some((grid.clone(), hints.clone()));
        for hint in &hints {
            accu.push(hint.clone());
        }
        Ok(())
    }

    /// All hints on `grid`, sorted by (difficulty, complexity, sort key).
    pub fn get_hint_list(&mut self, grid: &Grid) -> Result<Vec<ChainingHint>, ChainingError> {
        let result = if self.multiple || self.dynamic {
            self.multiple_chains_hints(grid)?
        } else {
            // Cycles with X-links (coloring / fishy), then Y-links, then both.
            let mut result = self.loop_hints(grid, false, true)?;
            result.extend(self.loop_hints(grid, true, false)?);
            result.extend(self.loop_hints(grid, true, true)?);
            result
        };
        if result.is_empty() {
            return Ok(result);
        }
        let mut sortable: Vec<(f64, usize, i32, ChainingHint)> = result
            .into_iter()
            .map(|h| (h.difficulty(), h.complexity(), h.sort_key(), h))
            .collect();
        sortable.sort_by(|a, b| {
            a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2))
        });
        Ok(sortable.into_iter().map(|(_, _, _, h)| h).collect())
    }

    // ==================== Unary driver: cycles & forcing chains ====================

    fn loop_hints(
        &self,
        grid: &Grid,
        y_enabled: bool,
        x_enabled: bool,
    ) -> Result<Vec<ChainingHint>, ChainingError> {
        let mut result = Vec::new();
        for cell in 0..81 {
            if grid.cell_value(cell) == 0 && grid.candidates(cell).count() > 1 {
                for value in 1..=9u8 {
                    if grid.has_candidate(cell, value) {
                        result.extend(self.unary_chaining(
                            grid, cell, value, y_enabled, x_enabled,
                        )?);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Single forcing chains and bidirectional cycles from one starting
    /// potential.
    fn unary_chaining(
        &self,
        grid: &Grid,
        cell: usize,
        value: u8,
        y_enabled: bool,
        x_enabled: bool,
    ) -> Result<Vec<ChainingHint>, ChainingError> {
        // Y-cycles can only start from bivalue cells.
        if grid.candidates(cell).count() > 2 && !x_enabled {
            return Ok(Vec::new());
        }

        let mut graph = ChainGraph::new();
        let p_on = graph.add(Potential::new(cell, value, true));
        let mut cycles: Vec<NodeId> = Vec::new();
        let mut chains: Vec<NodeId> = Vec::new();

        let mut to_on = PotentialSet::new();
        let mut to_off = PotentialSet::new();
        to_on.insert(&graph, p_on);
        self.do_cycles(grid, &mut graph, &mut to_on, &mut to_off, y_enabled, x_enabled, &mut cycles, p_on)?;

        if x_enabled {
            // Forcing Y-chains do not exist (the length would have to be
            // both odd and even).

            // Forcing chain with "off" implication.
            let mut to_on = PotentialSet::new();
            let mut to_off = PotentialSet::new();
            to_on.insert(&graph, p_on);
            self.do_forcing_chains(grid, &mut graph, &mut to_on, &mut to_off, y_enabled, &mut chains, p_on)?;

            // Forcing chain with "on" implication.
            let p_off = graph.add(Potential::new(cell, value, false));
            let mut to_on = PotentialSet::new();
            let mut to_off = PotentialSet::new();
            to_off.insert(&graph, p_off);
            self.do_forcing_chains(grid, &mut graph, &mut to_on, &mut to_off, y_enabled, &mut chains, p_off)?;
        }

        let mut protos: Vec<ProtoHint> = Vec::new();
        for dst_on in cycles {
            debug_assert!(graph.node(dst_on).is_on);
            let proto = create_cycle_hint(grid, &mut graph, dst_on, y_enabled, x_enabled);
            if proto.is_worth() {
                protos.push(proto);
            }
        }
        for target in chains {
            let proto = create_forcing_chain_hint(grid, &graph, target, y_enabled, x_enabled);
            if proto.is_worth() {
                protos.push(proto);
            }
        }
        let graph = Arc::new(graph);
        Ok(protos.into_iter().map(|p| p.into_hint(&graph)).collect())
    }

    /// BFS from the source potential recording every closure back onto the
    /// source of even length >= 4.
    #[allow(clippy::too_many_arguments)]
    fn do_cycles(
        &self,
        grid: &Grid,
        graph: &mut ChainGraph,
        to_on: &mut PotentialSet,
        to_off: &mut PotentialSet,
        y_enabled: bool,
        x_enabled: bool,
        cycles: &mut Vec<NodeId>,
        source: NodeId,
    ) -> Result<(), ChainingError> {
        let source_key = graph.key(source);
        let mut pending_on: VecDeque<NodeId> = to_on.iter().collect();
        let mut pending_off: VecDeque<NodeId> = to_off.iter().collect();
        let mut length = 0u32;

        while !pending_on.is_empty() || !pending_off.is_empty() {
            length += 1;
            while let Some(p) = pending_on.pop_front() {
                for p_off in self.on_to_off(grid, graph, p, y_enabled) {
                    if !graph.is_parent(p, graph.key(p_off)) {
                        // Not processed yet
                        pending_off.push_back(p_off);
                        to_off.insert(graph, p_off);
                    }
                }
            }
            length += 1;
            while let Some(p) = pending_off.pop_front() {
                let make_on =
                    self.off_to_on(grid, grid, graph, to_off, p, y_enabled, x_enabled)?;
                for p_on in make_on.iter() {
                    if length >= 4 && graph.key(p_on) == source_key {
                        // Cycle found
                        cycles.push(p_on);
                    }
                    if !to_on.contains(graph.key(p_on)) {
                        pending_on.push_back(p_on);
                        to_on.insert(graph, p_on);
                    }
                }
            }
        }
        Ok(())
    }

    /// BFS recording every node whose conjugate equals the source: the
    /// assumption implies its own negation, forcing the conjugate.
    #[allow(clippy::too_many_arguments)]
    fn do_forcing_chains(
        &self,
        grid: &Grid,
        graph: &mut ChainGraph,
        to_on: &mut PotentialSet,
        to_off: &mut PotentialSet,
        y_enabled: bool,
        chains: &mut Vec<NodeId>,
        source: NodeId,
    ) -> Result<(), ChainingError> {
        let source_key = graph.key(source);
        let mut pending_on: VecDeque<NodeId> = to_on.iter().collect();
        let mut pending_off: VecDeque<NodeId> = to_off.iter().collect();

        while !pending_on.is_empty() || !pending_off.is_empty() {
            while let Some(p) = pending_on.pop_front() {
                for p_off in self.on_to_off(grid, graph, p, y_enabled) {
                    let (cell, value, _) = graph.key(p_off);
                    if source_key == (cell, value, true)
                        && !chains.iter().any(|&id| graph.key(id) == (cell, value, false))
                    {
                        // Cyclic contradiction (forcing chain) found
                        chains.push(p_off);
                    }
                    if !to_off.contains((cell, value, false)) {
                        pending_off.push_back(p_off);
                        to_off.insert(graph, p_off);
                    }
                }
            }
            while let Some(p) = pending_off.pop_front() {
                let make_on = self.off_to_on(grid, grid, graph, to_off, p, y_enabled, true)?;
                for p_on in make_on.iter() {
                    let (cell, value, _) = graph.key(p_on);
                    if source_key == (cell, value, false)
                        && !chains.iter().any(|&id| graph.key(id) == (cell, value, true))
                    {
                        // Cyclic contradiction (forcing chain) found
                        chains.push(p_on);
                    }
                    if !to_on.contains((cell, value, true)) {
                        pending_on.push_back(p_on);
                        to_on.insert(graph, p_on);
                    }
                }
            }
        }
        Ok(())
    }

    // ==================== Multiple / dynamic drivers ====================

    fn multiple_chains_hints(&mut self, grid: &Grid) -> Result<Vec<ChainingHint>, ChainingError> {
        let no_parallel = !self.parallel || self.settings.num_threads <= 1;
        let mut result = Vec::new();
        let mut cells_to_process: Vec<usize> = Vec::new();

        for cell in 0..81 {
            if grid.cell_value(cell) != 0 {
                continue;
            }
            let cardinality = grid.candidates(cell).count();
            if cardinality > 2 || (cardinality > 1 && self.dynamic) {
                if no_parallel {
                    result.extend(self.multiple_chains_for_cell(grid, cell)?);
                } else {
                    cells_to_process.push(cell);
                }
            }
        }
        if no_parallel {
            return Ok(result);
        }

        debug!(
            "{}: fanning out {} starting cells across {} threads",
            self,
            cells_to_process.len(),
            self.settings.num_threads
        );
        let config = self.worker_config();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.num_threads)
            .build()
            .map_err(|e| ChainingError::Worker(e.to_string()))?;
        let worker_results: Vec<Result<Vec<ChainingHint>, ChainingError>> = pool.install(|| {
            cells_to_process
                .par_iter()
                .map(|&cell| {
                    let mut engine = Chaining::from_worker_config(&config);
                    let worker_grid = grid.clone();
                    engine.multiple_chains_for_cell(&worker_grid, cell)
                })
                .collect()
        });
        // Task order is preserved by the indexed collect, so the gathered
        // list is independent of worker interleaving.
        for worker_result in worker_results {
            result.extend(worker_result?);
        }
        Ok(result)
    }

    /// Binary, region and cell chaining from one starting cell.
    fn multiple_chains_for_cell(
        &mut self,
        grid: &Grid,
        cell: usize,
    ) -> Result<Vec<ChainingHint>, ChainingError> {
        let cardinality = grid.candidates(cell).count();
        let mut working = grid.clone();
        let mut graph = ChainGraph::new();
        let mut protos: Vec<ProtoHint> = Vec::new();

        // Storage and accumulators for cell reduction.
        let mut value_to_on: BTreeMap<u8, PotentialSet> = BTreeMap::new();
        let mut value_to_off: BTreeMap<u8, PotentialSet> = BTreeMap::new();
        let mut cell_to_on: Option<PotentialSet> = None;
        let mut cell_to_off: Option<PotentialSet> = None;

        for value in 1..=9u8 {
            if !grid.has_candidate(cell, value) {
                continue;
            }
            // Binary chaining (same potential either on or off).
            let p_on = graph.add(Potential::new(cell, value, true));
            let p_off = graph.add(Potential::new(cell, value, false));
            let mut on_to_on = PotentialSet::new();
            let mut on_to_off = PotentialSet::new();
            let do_reduction = cardinality >= 3 && !self.nishio && self.dynamic;
            let do_contradiction = self.dynamic || self.nishio;
            self.binary_chaining(
                &mut working,
                &mut graph,
                p_on,
                p_off,
                &mut on_to_on,
                &mut on_to_off,
                do_reduction,
                do_contradiction,
                &mut protos,
            )?;

            if !self.nishio {
                self.region_chainings(
                    grid,
                    &mut working,
                    &mut graph,
                    cell,
                    value,
                    &on_to_on,
                    &on_to_off,
                    &mut protos,
                )?;
            }

            // Collect results for cell chaining.
            match (&mut cell_to_on, &mut cell_to_off) {
                (Some(c_on), Some(c_off)) => {
                    c_on.retain_intersection(&on_to_on);
                    c_off.retain_intersection(&on_to_off);
                }
                _ => {
                    let mut c_on = PotentialSet::new();
                    c_on.add_all(&on_to_on);
                    let mut c_off = PotentialSet::new();
                    c_off.add_all(&on_to_off);
                    cell_to_on = Some(c_on);
                    cell_to_off = Some(c_off);
                }
            }
            value_to_on.insert(value, on_to_on);
            value_to_off.insert(value, on_to_off);
        }

        // Cell reduction.
        if !self.nishio && (cardinality == 2 || (self.multiple && cardinality > 2)) {
            if let (Some(cell_on), Some(cell_off)) = (&cell_to_on, &cell_to_off) {
                for target in cell_on.iter() {
                    let proto = create_cell_reduction_hint(
                        grid,
                        &graph,
                        cell,
                        target,
                        &value_to_on,
                        self.get_difficulty(),
                    );
                    if proto.is_worth() {
                        protos.push(proto);
                    }
                }
                for target in cell_off.iter() {
                    let proto = create_cell_reduction_hint(
                        grid,
                        &graph,
                        cell,
                        target,
                        &value_to_off,
                        self.get_difficulty(),
                    );
                    if proto.is_worth() {
                        protos.push(proto);
                    }
                }
            }
        }

        let graph = Arc::new(graph);
        Ok(protos.into_iter().map(|p| p.into_hint(&graph)).collect())
    }

    /// Propagate one candidate from both assumed states; report
    /// contradictions and (in reduction mode) potentials forced either way.
    #[allow(clippy::too_many_arguments)]
    fn binary_chaining(
        &mut self,
        working: &mut Grid,
        graph: &mut ChainGraph,
        p_on: NodeId,
        p_off: NodeId,
        on_to_on: &mut PotentialSet,
        on_to_off: &mut PotentialSet,
        do_reduction: bool,
        do_contradiction: bool,
        protos: &mut Vec<ProtoHint>,
    ) -> Result<(), ChainingError> {
        let mut off_to_on = PotentialSet::new();
        let mut off_to_off = PotentialSet::new();

        // A hypothesis implying its own negation is already covered by cell
        // forcing chains and is not checked for here.

        // Test p = "on".
        on_to_on.insert(graph, p_on);
        let absurd = self.do_chaining(working, graph, on_to_on, on_to_off)?;
        if do_contradiction {
            if let Some((dst_on, dst_off)) = absurd {
                // p cannot hold its value: it would lead to a contradiction.
                let proto = create_binary_off_hint(
                    graph,
                    dst_on,
                    dst_off,
                    p_on,
                    p_on,
                    true,
                    self.nishio,
                    self.get_difficulty(),
                );
                if proto.is_worth() {
                    protos.push(proto);
                }
            }
        }

        // Test p = "off".
        off_to_off.insert(graph, p_off);
        let absurd = self.do_chaining(working, graph, &mut off_to_on, &mut off_to_off)?;
        if do_contradiction {
            if let Some((dst_on, dst_off)) = absurd {
                // p must hold its value: its absence leads to a contradiction.
                let proto = create_binary_on_hint(
                    working,
                    graph,
                    dst_on,
                    dst_off,
                    p_off,
                    p_off,
                    true,
                    self.nishio,
                    self.get_difficulty(),
                );
                if proto.is_worth() {
                    protos.push(proto);
                }
            }
        }

        if do_reduction {
            // Potentials that are on in both cases.
            for p_from_on in on_to_on.iter() {
                if let Some(p_from_off) = off_to_on.get(graph.key(p_from_on)) {
                    let proto = create_binary_on_hint(
                        working,
                        graph,
                        p_from_on,
                        p_from_off,
                        p_on,
                        p_from_on,
                        false,
                        self.nishio,
                        self.get_difficulty(),
                    );
                    if proto.is_worth() {
                        protos.push(proto);
                    }
                }
            }
            // Potentials that are off in both cases.
            for p_from_on in on_to_off.iter() {
                if let Some(p_from_off) = off_to_off.get(graph.key(p_from_on)) {
                    let proto = create_binary_off_hint(
                        graph,
                        p_from_on,
                        p_from_off,
                        p_off,
                        p_from_off,
                        false,
                        self.nishio,
                        self.get_difficulty(),
                    );
                    if proto.is_worth() {
                        protos.push(proto);
                    }
                }
            }
        }
        Ok(())
    }

    /// For each region where the value has few enough positions, propagate
    /// from each position and keep what every branch agrees on. Only the
    /// lowest-indexed position does the work, so each region is searched
    /// once.
    #[allow(clippy::too_many_arguments)]
    fn region_chainings(
        &mut self,
        grid: &Grid,
        working: &mut Grid,
        graph: &mut ChainGraph,
        cell: usize,
        value: u8,
        on_to_on: &PotentialSet,
        on_to_off: &PotentialSet,
        protos: &mut Vec<ProtoHint>,
    ) -> Result<(), ChainingError> {
        for kind in RegionKind::ALL {
            let region = Region::at(kind, cell);
            let positions = region.potential_positions(grid, value);
            let cardinality = positions.count_ones();
            if cardinality != 2 && !(self.multiple && cardinality > 2) {
                continue;
            }
            // Is this the first time the region is met?
            let first_position = mask_positions(positions).next().expect("non-empty mask");
            if region.cell(first_position) != cell {
                continue;
            }

            let mut pos_to_on: BTreeMap<usize, PotentialSet> = BTreeMap::new();
            let mut pos_to_off: BTreeMap<usize, PotentialSet> = BTreeMap::new();
            let mut region_to_on = PotentialSet::new();
            let mut region_to_off = PotentialSet::new();

            for position in mask_positions(positions) {
                let other_cell = region.cell(position);
                if other_cell == cell {
                    region_to_on.add_all(on_to_on);
                    region_to_off.add_all(on_to_off);
                    pos_to_on.insert(position, on_to_on.clone());
                    pos_to_off.insert(position, on_to_off.clone());
                } else {
                    let other = graph.add(Potential::new(other_cell, value, true));
                    let mut other_to_on = PotentialSet::new();
                    let mut other_to_off = PotentialSet::new();
                    other_to_on.insert(graph, other);
                    self.do_chaining(working, graph, &mut other_to_on, &mut other_to_off)?;
                    region_to_on.retain_intersection(&other_to_on);
                    region_to_off.retain_intersection(&other_to_off);
                    pos_to_on.insert(position, other_to_on);
                    pos_to_off.insert(position, other_to_off);
                }
            }

            for target in region_to_on.iter() {
                let proto = create_region_reduction_hint(
                    grid,
                    graph,
                    region,
                    value,
                    target,
                    &pos_to_on,
                    self.get_difficulty(),
                );
                if proto.is_worth() {
                    protos.push(proto);
                }
            }
            for target in region_to_off.iter() {
                let proto = create_region_reduction_hint(
                    grid,
                    graph,
                    region,
                    value,
                    target,
                    &pos_to_off,
                    self.get_difficulty(),
                );
                if proto.is_worth() {
                    protos.push(proto);
                }
            }
        }
        Ok(())
    }
}

/// Long suffix naming the extension stack of a nested engine.
pub fn nested_suffix(level: u32) -> String {
    match level {
        0 => String::new(),
        1 => " (+)".to_string(),
        2 => " (+ Forcing Chains)".to_string(),
        3 => " (+ Multiple Forcing Chains)".to_string(),
        4 => " (+ Dynamic Forcing Chains)".to_string(),
        _ => format!(" (+ Dynamic Forcing Chains{})", nested_suffix(level - 3)),
    }
}

/// Short form of [`nested_suffix`].
pub fn short_nested_suffix(level: u32) -> String {
    match level {
        0 => String::new(),
        1 => "+".to_string(),
        2 => "+FC".to_string(),
        3 => "+MFC".to_string(),
        4 => "+DFC".to_string(),
        _ => format!("+DFC{}", short_nested_suffix(level - 3)),
    }
}

impl std::fmt::Display for Chaining {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.nishio {
            write!(f, "Nishio Forcing Chains")
        } else if self.dynamic {
            write!(f, "Dynamic Forcing Chains{}", nested_suffix(self.level))
        } else if self.multiple {
            write!(f, "Multiple Forcing Chains")
        } else {
            write!(f, "Forcing Chains & Cycles")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BitSet;

    // Arto Inkala's puzzle; needs chains well beyond singles.
    const HARD_PUZZLE: &str =
        "800000000003600000070090200050007000000045700000100030001000068008500010090000400";

    fn keep_candidates(grid: &mut Grid, cell: usize, keep: &[u8]) {
        for v in 1..=9 {
            if !keep.contains(&v) {
                grid.remove_candidate(cell, v);
            }
        }
    }

    fn render(hint: &ChainingHint) -> String {
        format!(
            "{} {:?} c{} k{}",
            hint.name(),
            hint.removable_potentials(),
            hint.complexity(),
            hint.sort_key()
        )
    }

    /// Length of the first-parent walk from a node to the chain root.
    fn chain_length(hint: &ChainingHint, start: NodeId) -> usize {
        let mut length = 0;
        let mut current = start;
        while let Some(&parent) = hint.graph().node(current).parents.first() {
            length += 1;
            current = parent;
        }
        length
    }

    #[test]
    fn engine_difficulties() {
        assert_eq!(Chaining::new(false, true, true, 0).get_difficulty(), 7.5);
        assert_eq!(Chaining::new(true, false, false, 0).get_difficulty(), 8.0);
        assert_eq!(Chaining::new(true, true, false, 0).get_difficulty(), 8.5);
        assert_eq!(Chaining::new(true, true, false, 1).get_difficulty(), 9.0);
        assert_eq!(Chaining::new(true, true, false, 2).get_difficulty(), 9.5);
        assert_eq!(Chaining::new(true, true, false, 3).get_difficulty(), 10.0);
    }

    #[test]
    #[should_panic]
    fn plain_cycle_engine_has_no_difficulty() {
        Chaining::new(false, false, false, 0).get_difficulty();
    }

    #[test]
    fn engine_names() {
        assert_eq!(
            Chaining::new(false, true, true, 0).to_string(),
            "Nishio Forcing Chains"
        );
        assert_eq!(
            Chaining::new(true, true, false, 0).to_string(),
            "Dynamic Forcing Chains"
        );
        assert_eq!(
            Chaining::new(true, false, false, 0).to_string(),
            "Multiple Forcing Chains"
        );
        assert_eq!(
            Chaining::new(false, false, false, 0).to_string(),
            "Forcing Chains & Cycles"
        );
        assert_eq!(
            Chaining::new(true, true, false, 2).to_string(),
            "Dynamic Forcing Chains (+ Forcing Chains)"
        );
        assert_eq!(
            nested_suffix(5),
            " (+ Dynamic Forcing Chains (+ Forcing Chains))"
        );
        assert_eq!(short_nested_suffix(5), "+DFC+FC");
    }

    /// Row 1 holds 5 only in r1c1/r1c5, column 1 only in r1c1/r5c1 and
    /// column 5 only in r1c5/r5c5: a four-cell single-digit loop. The cycle
    /// cancels 5 everywhere in row 5 outside the loop.
    fn x_cycle_grid() -> Grid {
        let mut grid = Grid::empty();
        for col in [1, 2, 3, 5, 6, 7, 8] {
            grid.remove_candidate(col, 5);
        }
        for row in [1, 2, 3, 5, 6, 7, 8] {
            grid.remove_candidate(row * 9, 5);
            grid.remove_candidate(row * 9 + 4, 5);
        }
        grid
    }

    #[test]
    fn x_chain_cycle_elimination() {
        let grid = x_cycle_grid();
        let mut engine = Chaining::new(false, false, false, 0);
        let hints = engine.get_hint_list(&grid).unwrap();
        assert!(!hints.is_empty());

        let expected: Vec<u8> = vec![37, 38, 39, 41, 42, 43, 44];
        let cycle = hints
            .iter()
            .find(|h| {
                matches!(h.kind(), ChainingHintKind::Cycle { .. })
                    && expected.iter().all(|c| {
                        h.removable_potentials().get(c) == Some(&BitSet::singleton(5))
                    })
            })
            .expect("four-cell cycle eliminating 5 from the rest of row 5");
        assert_eq!(engine.get_common_name(cycle), Some("X-Chain"));

        // Every cycle in the output is even and at least four steps long;
        // the length-2 closure through r5c1 must have been discarded.
        for hint in &hints {
            if let ChainingHintKind::Cycle { dst_on, .. } = hint.kind() {
                let length = chain_length(hint, *dst_on);
                assert!(length >= 4 && length % 2 == 0, "cycle of length {}", length);
            }
        }
    }

    #[test]
    fn bidirectional_cycle_on_two_digits() {
        // Four bivalue {3,7} cells in rows 2 and 8; columns 2 and 6 are
        // bi-position for 3 between those rows.
        let mut grid = Grid::empty();
        for cell in [10, 14, 64, 68] {
            keep_candidates(&mut grid, cell, &[3, 7]);
        }
        for row in [0, 2, 3, 4, 5, 6, 8] {
            grid.remove_candidate(row * 9 + 1, 3);
            grid.remove_candidate(row * 9 + 5, 3);
        }
        let mut engine = Chaining::new(false, false, false, 0);
        let hints = engine.get_hint_list(&grid).unwrap();

        let cycle = hints
            .iter()
            .find(|h| {
                matches!(h.kind(), ChainingHintKind::Cycle { .. })
                    && h.removable_potentials()
                        .get(&37)
                        .is_some_and(|v| v.contains(7))
            })
            .expect("cycle eliminating 7 from r5c2");
        for (&cell, values) in cycle.removable_potentials() {
            for value in values.iter() {
                assert!(grid.has_candidate(cell as usize, value));
            }
        }
    }

    /// Bilocation web where assuming r1c1=4 forces r6c6 both on and off.
    fn nishio_grid() -> Grid {
        let mut grid = Grid::empty();
        for col in [1, 2, 3, 4, 6, 7, 8] {
            grid.remove_candidate(col, 4);
        }
        for cell in [9, 11, 18, 19, 20] {
            grid.remove_candidate(cell, 4);
        }
        for row in [2, 3, 4, 6, 7, 8] {
            grid.remove_candidate(row * 9 + 1, 4);
        }
        for row in [1, 2, 3, 4, 6, 7, 8] {
            grid.remove_candidate(row * 9 + 5, 4);
        }
        grid
    }

    #[test]
    fn nishio_contradiction_removes_assumption() {
        let mut engine = Chaining::new(false, true, true, 0);
        let hints = engine.get_hint_list(&nishio_grid()).unwrap();
        let hint = hints
            .iter()
            .find(|h| {
                h.removable_potentials().get(&0) == Some(&BitSet::singleton(4))
                    && h.name() == "Nishio Forcing Chain"
            })
            .expect("contradiction hint removing 4 from r1c1");

        // The contradiction endpoints share (cell, value) and differ only in
        // polarity.
        if let ChainingHintKind::Binary {
            dst_on,
            dst_off,
            is_absurd,
            ..
        } = hint.kind()
        {
            assert!(*is_absurd);
            let on = hint.graph().key(*dst_on);
            let off = hint.graph().key(*dst_off);
            assert_eq!((on.0, on.1), (off.0, off.1));
            assert!(on.2 && !off.2);
        } else {
            panic!("expected a binary chaining hint");
        }
    }

    /// r1c1={1,2} with r1c5={2,3} and r5c1={1,3}: either candidate of r1c1
    /// turns one of the bivalue companions to 3, and both chains clear 3
    /// from r5c5.
    fn cell_reduction_grid() -> Grid {
        let mut grid = Grid::empty();
        keep_candidates(&mut grid, 0, &[1, 2]);
        keep_candidates(&mut grid, 4, &[2, 3]);
        keep_candidates(&mut grid, 36, &[1, 3]);
        grid
    }

    #[test]
    fn cell_reduction_convergence() {
        let mut engine = Chaining::new(true, true, false, 0);
        let hints = engine.get_hint_list(&cell_reduction_grid()).unwrap();
        let hint = hints
            .iter()
            .find(|h| {
                matches!(h.kind(), ChainingHintKind::CellReduction { cell, .. } if *cell == 0)
                    && h.removable_potentials().get(&40) == Some(&BitSet::singleton(3))
            })
            .expect("cell reduction removing 3 from r5c5");
        // One chain per candidate of the starting cell.
        if let ChainingHintKind::CellReduction { chains, .. } = hint.kind() {
            let values: Vec<u8> = chains.iter().map(|&(v, _)| v).collect();
            assert_eq!(values, vec![1, 2]);
        }
    }

    #[test]
    fn region_search_only_from_lowest_position() {
        // Column 1 is bi-position for 1 between r1c1 and r5c1; the task for
        // r5c1 must leave that region to the task for r1c1.
        let grid = cell_reduction_grid();
        let mut engine = Chaining::new(true, true, false, 0);
        let hints = engine.multiple_chains_for_cell(&grid, 36).unwrap();
        for hint in &hints {
            if let ChainingHintKind::RegionReduction { region, value, .. } = hint.kind() {
                assert!(
                    !(region.kind == RegionKind::Column && region.index == 0 && *value == 1),
                    "region reduction claimed by a non-minimal position"
                );
            }
        }
    }

    #[test]
    fn unary_chain_needs_bivalue_cell_without_x_links() {
        let mut grid = Grid::empty();
        keep_candidates(&mut grid, 0, &[1, 2, 3]);
        let engine = Chaining::new(false, false, false, 0);
        let hints = engine.unary_chaining(&grid, 0, 1, true, false).unwrap();
        assert!(hints.is_empty());
    }

    #[test]
    fn removable_entries_are_current_candidates() {
        let grid = Grid::from_string(HARD_PUZZLE).unwrap();
        let mut engine = Chaining::new(true, false, false, 0);
        let hints = engine.get_hint_list(&grid).unwrap();
        for hint in &hints {
            assert!(!hint.removable_potentials().is_empty());
            for (&cell, values) in hint.removable_potentials() {
                for value in values.iter() {
                    assert!(
                        grid.has_candidate(cell as usize, value),
                        "{} removes non-candidate {} of cell {}",
                        hint.name(),
                        value,
                        cell
                    );
                }
            }
        }
    }

    #[test]
    fn parent_polarity_invariant() {
        let grid = Grid::from_string(HARD_PUZZLE).unwrap();
        let mut engine = Chaining::new(true, false, false, 0);
        let hints = engine.get_hint_list(&grid).unwrap();
        for hint in &hints {
            let graph = hint.graph();
            let mut stack = hint.chain_targets();
            let mut seen = HashSet::new();
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                let node = graph.node(id);
                for &parent in &node.parents {
                    if node.cause != Cause::Advanced {
                        assert_ne!(
                            graph.node(parent).is_on, node.is_on,
                            "non-advanced edge must flip polarity"
                        );
                    }
                    stack.push(parent);
                }
            }
        }
    }

    #[test]
    fn output_is_sorted_and_deterministic() {
        let grid = Grid::from_string(HARD_PUZZLE).unwrap();
        let mut engine = Chaining::new(true, false, false, 0);
        let first: Vec<String> = engine.get_hint_list(&grid).unwrap().iter().map(render).collect();
        let mut engine = Chaining::new(true, false, false, 0);
        let second: Vec<String> =
            engine.get_hint_list(&grid).unwrap().iter().map(render).collect();
        assert_eq!(first, second);

        let mut engine = Chaining::new(true, false, false, 0);
        let hints = engine.get_hint_list(&grid).unwrap();
        let keys: Vec<(f64, usize, i32)> = hints
            .iter()
            .map(|h| (h.difficulty(), h.complexity(), h.sort_key()))
            .collect();
        for pair in keys.windows(2) {
            assert!(
                pair[0].0.total_cmp(&pair[1].0).then(pair[0].1.cmp(&pair[1].1)).then(pair[0].2.cmp(&pair[1].2))
                    != std::cmp::Ordering::Greater
            );
        }
    }

    #[test]
    fn memo_replays_stored_hints() {
        let grid = x_cycle_grid();
        let mut engine = Chaining::new(false, false, false, 0);
        let mut first: Vec<ChainingHint> = Vec::new();
        engine.get_hints(&grid, &mut first).unwrap();
        let mut second: Vec<ChainingHint> = Vec::new();
        engine.get_hints(&grid, &mut second).unwrap();
        assert_eq!(first.len(), second.len());
        assert!(!first.is_empty());
        // Replayed hints share the stored proof graphs: propagation did not
        // run again.
        for (a, b) in first.iter().zip(&second) {
            assert!(std::ptr::eq(a.graph(), b.graph()));
            assert_eq!(render(a), render(b));
        }
        // A different grid invalidates the memo.
        let mut third: Vec<ChainingHint> = Vec::new();
        let mut other = grid.clone();
        other.remove_candidate(80, 9);
        engine.get_hints(&other, &mut third).unwrap();
        if let (Some(a), Some(b)) = (first.first(), third.first()) {
            assert!(!std::ptr::eq(a.graph(), b.graph()));
        }
    }

    #[test]
    fn parallel_matches_sequential() {
        let grid = Grid::from_string(HARD_PUZZLE).unwrap();
        let settings = Settings {
            num_threads: 8,
            mode: ChainingMode::Deterministic,
        };
        let mut sequential = Chaining::with_options(true, false, false, 0, false, 0)
            .with_settings(settings.clone());
        let mut parallel = Chaining::with_options(true, false, false, 0, true, 0)
            .with_settings(settings);
        let left: Vec<String> =
            sequential.get_hint_list(&grid).unwrap().iter().map(render).collect();
        let right: Vec<String> =
            parallel.get_hint_list(&grid).unwrap().iter().map(render).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn cancellation_unwinds_from_rule_checkpoint() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut engine = Chaining::new(true, true, false, 1).with_interrupt(flag);
        let result = engine.get_hint_list(&cell_reduction_grid());
        assert!(matches!(result, Err(ChainingError::Cancelled)));
    }

    #[test]
    fn level_one_engine_is_deterministic() {
        let mut engine = Chaining::new(true, true, false, 1);
        let first: Vec<String> = engine
            .get_hint_list(&cell_reduction_grid())
            .unwrap()
            .iter()
            .map(render)
            .collect();
        let mut engine = Chaining::new(true, true, false, 1);
        let second: Vec<String> = engine
            .get_hint_list(&cell_reduction_grid())
            .unwrap()
            .iter()
            .map(render)
            .collect();
        assert_eq!(first, second);
    }
}
