use thiserror::Error;

/// Failures surfaced by the chaining engine.
///
/// Only `Cancelled` is meant to be handled above the engine boundary; the
/// other variants indicate broken invariants and should abort the caller.
#[derive(Error, Debug, Clone)]
pub enum ChainingError {
    /// Hidden-parent recovery did not find the off-potential that dynamic
    /// propagation must have recorded for an eliminated candidate.
    #[error("no recorded off-potential for candidate {value} of cell {cell}")]
    MissingParent { cell: usize, value: u8 },

    /// The caller requested interruption; the current search was abandoned.
    #[error("chaining search was cancelled")]
    Cancelled,

    /// A parallel worker failed; recorded and rethrown from the joiner.
    #[error("chaining worker failed: {0}")]
    Worker(String),
}
