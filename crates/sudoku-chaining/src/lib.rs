//! Chaining inference engine for 9x9 Sudoku.
//!
//! Derives logical eliminations by assuming each candidate of a cell to be
//! present ("on") or absent ("off"), propagating the consequences through a
//! bidirectional implication graph, and reporting structured hints: cycles,
//! forcing chains, binary chains, and cell/region reductions. The engine
//! never guesses and never searches; every hint carries the proof graph
//! that justifies it.
//!
//! ```
//! use sudoku_chaining::{Chaining, Grid};
//!
//! let grid = Grid::from_string(
//!     "800000000003600000070090200050007000000045700000100030001000068008500010090000400",
//! )
//! .unwrap();
//! let mut engine = Chaining::new(true, false, false, 0);
//! let mut hints = Vec::new();
//! engine.get_hints(&grid, &mut hints).unwrap();
//! for hint in &hints {
//!     println!("{}: {:?}", hint.name(), hint.removable_potentials());
//! }
//! ```

pub mod chaining;
pub mod error;
pub mod grid;
pub mod rules;

pub use chaining::{
    Cause, ChainGraph, Chaining, ChainingHint, ChainingHintKind, ChainingMode, HintSink,
    PatternHint, Potential, PotentialSet, RuleHint, RuleProducer, Settings,
};
pub use error::ChainingError;
pub use grid::{BitSet, Grid, Region, RegionKind};
