//! Advanced extension: when plain propagation stalls, auxiliary pattern
//! rules (and, at deeper levels, nested chaining engines) contribute extra
//! off-implications whose premises are recovered against the pre-propagation
//! snapshot.

use std::sync::Arc;

use log::debug;

use crate::error::ChainingError;
use crate::grid::{BitSet, Grid};
use crate::rules::{Fisherman, HiddenSet, Locking, NakedSet};

use super::hints::{canonical_cell_order, ChainingHint};
use super::potential::{Cause, ChainGraph, NodeId, Potential, PotentialKey, PotentialSet};
use super::{Chaining, ChainingMode};

/// An auxiliary rule the propagator can consult when both frontiers drain.
pub trait RuleProducer {
    fn name(&self) -> String;

    /// Push every deduction the rule finds on `grid` into `accu`.
    fn produce_hints(
        &mut self,
        grid: &Grid,
        accu: &mut dyn FnMut(RuleHint),
    ) -> Result<(), ChainingError>;
}

/// A deduction from an auxiliary rule: either a static pattern or a hint
/// from a nested chaining engine.
pub enum RuleHint {
    Pattern(PatternHint),
    Chain(Arc<ChainingHint>),
}

/// A static pattern deduction (locking, subset, fish).
///
/// `parent_cells` x `parent_values` delimits the candidates whose absence
/// the pattern depends on; rule parents are the ones eliminated since the
/// snapshot.
pub struct PatternHint {
    pub description: String,
    pub removable: Vec<(u8, BitSet)>,
    pub parent_cells: Vec<u8>,
    pub parent_values: BitSet,
}

impl RuleHint {
    pub fn description(&self) -> String {
        match self {
            RuleHint::Pattern(p) => p.description.clone(),
            RuleHint::Chain(h) => h.description(),
        }
    }

    pub fn removable_potentials(&self) -> Vec<(u8, BitSet)> {
        match self {
            RuleHint::Pattern(p) => p.removable.clone(),
            RuleHint::Chain(h) => h
                .removable_potentials()
                .iter()
                .map(|(&cell, &values)| (cell, values))
                .collect(),
        }
    }

    /// Off-potentials of the enclosing chain this deduction depends on.
    /// Empty means the rule applies to the original grid as well and is
    /// useless as a chain step.
    pub fn rule_parents(&self, source: &Grid, current: &Grid) -> Vec<PotentialKey> {
        match self {
            RuleHint::Pattern(p) => {
                let mut parents = Vec::new();
                for &cell in &p.parent_cells {
                    for value in p.parent_values.iter() {
                        if source.has_candidate(cell as usize, value)
                            && !current.has_candidate(cell as usize, value)
                        {
                            parents.push((cell, value, false));
                        }
                    }
                }
                parents
            }
            RuleHint::Chain(h) => h.rule_parents(source, current),
        }
    }

    fn nested(&self) -> Option<Arc<ChainingHint>> {
        match self {
            RuleHint::Pattern(_) => None,
            RuleHint::Chain(h) => Some(Arc::clone(h)),
        }
    }
}

/// A nested chaining engine is itself an auxiliary rule.
impl RuleProducer for Chaining {
    fn name(&self) -> String {
        self.to_string()
    }

    fn produce_hints(
        &mut self,
        grid: &Grid,
        accu: &mut dyn FnMut(RuleHint),
    ) -> Result<(), ChainingError> {
        let mut hints: Vec<ChainingHint> = Vec::new();
        self.get_hints(grid, &mut hints)?;
        for hint in hints {
            accu(RuleHint::Chain(Arc::new(hint)));
        }
        Ok(())
    }
}

impl Chaining {
    /// Non-trivial off-implications obtained by running the auxiliary rule
    /// stack on the (possibly dynamically reduced) working grid. Stops at
    /// the first rule that contributes anything.
    pub(crate) fn advanced_potentials(
        &mut self,
        grid: &Grid,
        source: &Grid,
        graph: &mut ChainGraph,
        off_potentials: &PotentialSet,
    ) -> Result<Vec<NodeId>, ChainingError> {
        if self.other_rules.is_none() {
            self.other_rules = Some(self.build_rules());
        }
        let mut rules = self.other_rules.take().expect("rules just initialized");
        let result = self.run_rules(&mut rules, grid, source, graph, off_potentials);
        self.other_rules = Some(rules);
        result
    }

    fn run_rules(
        &self,
        rules: &mut [Box<dyn RuleProducer>],
        grid: &Grid,
        source: &Grid,
        graph: &mut ChainGraph,
        off_potentials: &PotentialSet,
    ) -> Result<Vec<NodeId>, ChainingError> {
        let mut result = Vec::new();
        for rule in rules.iter_mut() {
            self.check_cancelled()?;
            let mut hints: Vec<RuleHint> = Vec::new();
            rule.produce_hints(grid, &mut |hint| hints.push(hint))?;
            if !hints.is_empty() {
                debug!("advanced rule {} produced {} hints", rule.name(), hints.len());
            }
            for hint in hints {
                let parents = hint.rule_parents(source, grid);
                // A rule that holds without the chain's eliminations is not
                // an implication of the chain.
                if parents.is_empty() {
                    continue;
                }
                let mut parent_ids = Vec::with_capacity(parents.len());
                for key in &parents {
                    let real = off_potentials.get(*key).ok_or(ChainingError::MissingParent {
                        cell: key.0 as usize,
                        value: key.1,
                    })?;
                    parent_ids.push(real);
                }
                let mut removable = hint.removable_potentials();
                if self.settings.mode == ChainingMode::Deterministic {
                    // Canonical cell order keeps repeated runs on one puzzle
                    // producing identical chains.
                    removable.sort_by(|a, b| canonical_cell_order(grid, a.0, b.0));
                }
                let description = hint.description();
                let nested = hint.nested();
                for (cell, values) in removable {
                    for value in values.iter() {
                        result.push(graph.add(Potential {
                            cell,
                            value,
                            is_on: false,
                            cause: Cause::Advanced,
                            explanation: description.clone(),
                            nested: nested.clone(),
                            parents: parent_ids.clone(),
                        }));
                    }
                }
            }
            if !result.is_empty() {
                break;
            }
        }
        Ok(result)
    }

    /// The rule stack for this engine's level, built lazily on first use.
    fn build_rules(&self) -> Vec<Box<dyn RuleProducer>> {
        let mut rules: Vec<Box<dyn RuleProducer>> = vec![
            Box::new(Locking::new()),
            Box::new(HiddenSet::new(2)),
            Box::new(NakedSet::new(2)),
            Box::new(Fisherman::new(2)),
        ];
        if self.level < 4 {
            if self.level >= 2 {
                // Forcing chains
                rules.push(Box::new(self.nested_engine(false, false, 0)));
            }
            if self.level >= 3 {
                // Multiple forcing chains
                rules.push(Box::new(self.nested_engine(true, false, 0)));
            }
        } else {
            // Dynamic forcing chains, recursing up to the nesting limit
            rules.push(Box::new(self.nested_engine(true, true, self.nesting_limit)));
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_hint_parents_are_eliminated_candidates() {
        let source = Grid::empty();
        let mut current = source.clone();
        current.remove_candidate(0, 5);
        current.remove_candidate(9, 5);
        current.remove_candidate(9, 6); // outside parent_values

        let hint = RuleHint::Pattern(PatternHint {
            description: "test pattern".to_string(),
            removable: vec![(20, BitSet::singleton(5))],
            parent_cells: vec![0, 9, 18],
            parent_values: BitSet::singleton(5),
        });
        assert_eq!(
            hint.rule_parents(&source, &current),
            vec![(0, 5, false), (9, 5, false)]
        );
    }

    #[test]
    fn pattern_hint_without_eliminations_has_no_parents() {
        let grid = Grid::empty();
        let hint = RuleHint::Pattern(PatternHint {
            description: "test pattern".to_string(),
            removable: vec![(20, BitSet::singleton(5))],
            parent_cells: vec![0, 9],
            parent_values: BitSet::singleton(5),
        });
        assert!(hint.rule_parents(&grid, &grid).is_empty());
    }
}
