//! # Temporalog - Incremental querying for time-indexed probabilistic logic
//!
//! Temporalog compiles the static structure of a probabilistic logic
//! program once into an immutable artifact, then answers queries across
//! timestamps as evidence arrives — optionally feeding each timestep's
//! results back as evidence for the next one.
//!
//! ## Core Concepts
//!
//! - **InputClause / Query**: immutable, timestamped evidence and questions
//! - **PrecompiledArtifact**: the reusable compiled program shape, built
//!   once and shared read-only across runs
//! - **QueryRunner**: per-timestep orchestration against a pluggable solver
//! - **FeedbackGenerator / FeedbackChain**: results of step `t` becoming
//!   evidence at `t + lag`
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use temporalog::{compile, InputClause, Query, QueryRunner, ReferenceSolver};
//!
//! let program = "odd(T) :- one(T).\nodd(T) :- three(T).\n";
//! let seed_clauses = vec![
//!     InputClause::new("one", 0, 0.5)?,
//!     InputClause::new("three", 0, 0.5)?,
//! ];
//! let seed_queries = vec![Query::new("odd", 0)?];
//!
//! // Compile once...
//! let artifact = compile(program, &seed_clauses, &seed_queries)?;
//!
//! // ...then query any timestep with fresh evidence.
//! let runner = QueryRunner::with_defaults(Arc::new(ReferenceSolver::new()));
//! let queries = vec![Query::new("odd", 7)?];
//! let events = vec![
//!     InputClause::new("one", 7, 0.1)?,
//!     InputClause::new("three", 7, 0.2)?,
//! ];
//! let result = runner.perform_queries(&artifact, &queries, events, false)?;
//! assert!((result.probability("odd", 7).unwrap().value() - 0.3).abs() < 1e-9);
//! # Ok::<(), temporalog::TemporalogError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod clause;
pub mod error;
pub mod feedback;
pub mod probability;
pub mod program;
pub mod result;
pub mod runner;
pub mod solver;
pub mod strategy;

// Re-export primary types at crate root for convenience
pub use artifact::{compile, ArtifactCache, Fingerprint, PrecompiledArtifact};
pub use clause::{InputClause, Query, QueryId, TimedAtom, ToProgramFragment};
pub use error::{CompileError, QueryError, TemporalogError, TemporalogResult, ValidationError};
pub use feedback::{FeedbackChain, FeedbackGenerator, StepOutcome};
pub use probability::Probability;
pub use program::{load_program, ProgramTemplate};
pub use result::{
    ExecutionResult, ResultKey, RunId, RunReport, StepReport, StepStatus, UnresolvedQuery,
};
pub use runner::{EventLog, QueryRunner, RunnerConfig};
pub use solver::reference::ReferenceSolver;
pub use solver::{EvaluationMap, Evaluator, SolverError};
pub use strategy::{EndToEndStrategy, ExecutionStrategy, IterativeStrategy, PrecompiledStrategy};
