//! The evaluator boundary.
//!
//! The engine never interprets probabilities itself: it hands a program
//! fragment (text) to an [`Evaluator`] and receives a probability per
//! queried atom back. Production deployments plug a weighted-model-counting
//! solver in behind this trait; [`reference::ReferenceSolver`] is a built-in
//! exact solver for the restricted fragment the engine emits, suitable for
//! testing and embedded use.

pub mod reference;

use std::collections::BTreeMap;

use thiserror::Error;

/// Probabilities keyed by `(predicate, timestamp)`, as returned by an
/// evaluator.
pub type EvaluationMap = BTreeMap<(String, i64), f64>;

/// Errors surfaced by an evaluator for a single `evaluate` call.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// The fragment could not be parsed.
    #[error("Malformed program fragment: {reason}")]
    Malformed {
        /// Parser diagnostic.
        reason: String,
    },

    /// A queried or referenced atom has no definition in the fragment.
    #[error("Atom '{predicate}({timestamp})' is not defined by the fragment")]
    UnknownAtom {
        /// Predicate of the undefined atom.
        predicate: String,
        /// Timestamp of the undefined atom.
        timestamp: i64,
    },

    /// Resolution revisited an atom already on the resolution stack.
    #[error("Cyclic dependency through '{predicate}({timestamp})'")]
    CyclicDependency {
        /// Predicate on the cycle.
        predicate: String,
        /// Timestamp on the cycle.
        timestamp: i64,
    },

    /// The evidence is contradictory or the model admits no world.
    #[error("Unsatisfiable fragment: {reason}")]
    Unsatisfiable {
        /// Solver diagnostic.
        reason: String,
    },

    /// The evaluation did not finish in time.
    #[error("Solver timed out after {waited_ms}ms")]
    Timeout {
        /// Milliseconds waited before giving up.
        waited_ms: u64,
    },

    /// The solver failed internally.
    #[error("Solver internal error: {message}")]
    Internal {
        /// Solver diagnostic.
        message: String,
    },
}

/// Black-box probability solver.
///
/// `evaluate` may block for an arbitrary time; the query runner wraps calls
/// with a timeout, and because the artifact it instantiates fragments from
/// is immutable, an abandoned call leaves no shared state to repair.
pub trait Evaluator: Send + Sync {
    /// Solves one program fragment, returning a probability for every
    /// queried atom.
    ///
    /// # Errors
    ///
    /// Returns `SolverError` when the fragment is malformed, unsatisfiable,
    /// or the solver fails.
    fn evaluate(&self, program: &str) -> Result<EvaluationMap, SolverError>;
}
