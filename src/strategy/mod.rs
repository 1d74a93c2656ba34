//! Execution strategies.
//!
//! Three ways to drive the evaluator over the same inputs. The precompiled
//! path is the production one; the iterative and end-to-end baselines pay
//! full recompilation or monolithic-unrolling costs and exist as
//! correctness oracles and performance comparators. For identical
//! non-feedback inputs all three agree within numeric tolerance.

mod end_to_end;
mod iterative;

pub use end_to_end::EndToEndStrategy;
pub use iterative::IterativeStrategy;

use std::sync::Arc;

use crate::artifact::{compile, PrecompiledArtifact};
use crate::clause::{InputClause, Query};
use crate::error::{CompileError, QueryError};
use crate::result::ExecutionResult;
use crate::runner::{EventLog, QueryRunner, RunnerConfig};
use crate::solver::Evaluator;

/// A way of answering a batch of timestamped queries.
pub trait ExecutionStrategy {
    /// Short name for reports and benchmarks.
    fn name(&self) -> &'static str;

    /// Answers the queries given the evidence.
    ///
    /// # Errors
    ///
    /// Returns `QueryError` as the underlying execution path does.
    fn run(&self, queries: &[Query], events: &EventLog) -> Result<ExecutionResult, QueryError>;
}

/// The production path: compile once, instantiate per timestep.
pub struct PrecompiledStrategy {
    artifact: PrecompiledArtifact,
    runner: QueryRunner,
}

impl PrecompiledStrategy {
    /// Compiles the base program against its seed and readies a runner.
    ///
    /// # Errors
    ///
    /// Returns `CompileError` if compilation fails.
    pub fn new(
        base_program: &str,
        seed_clauses: &[InputClause],
        seed_queries: &[Query],
        evaluator: Arc<dyn Evaluator>,
        config: RunnerConfig,
    ) -> Result<Self, CompileError> {
        let artifact = compile(base_program, seed_clauses, seed_queries)?;
        Ok(Self {
            artifact,
            runner: QueryRunner::new(evaluator, config),
        })
    }

    /// The strategy's compiled artifact.
    #[must_use]
    pub const fn artifact(&self) -> &PrecompiledArtifact {
        &self.artifact
    }

    /// The strategy's runner.
    #[must_use]
    pub const fn runner(&self) -> &QueryRunner {
        &self.runner
    }
}

impl ExecutionStrategy for PrecompiledStrategy {
    fn name(&self) -> &'static str {
        "precompiled"
    }

    fn run(&self, queries: &[Query], events: &EventLog) -> Result<ExecutionResult, QueryError> {
        self.runner
            .perform_queries(&self.artifact, queries, events.clone(), false)
    }
}
