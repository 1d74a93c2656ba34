//! The fully-iterative baseline.
//!
//! Re-parses the base program and solves a freshly built fragment at every
//! timestep — no artifact reuse. Pays N times the full compile cost, which
//! is exactly what makes it the correctness oracle the precompiled path is
//! measured against.

use std::sync::Arc;
use std::time::Instant;

use crate::clause::Query;
use crate::error::QueryError;
use crate::feedback::FeedbackGenerator;
use crate::program::{compose_fragment, ProgramTemplate};
use crate::result::{ExecutionResult, StepStatus};
use crate::runner::{collect_step, partition_queries, EventLog};
use crate::solver::{Evaluator, SolverError};

use super::ExecutionStrategy;

/// Recompiles and solves from scratch at every timestep.
pub struct IterativeStrategy {
    base_program: String,
    evaluator: Arc<dyn Evaluator>,
}

impl IterativeStrategy {
    /// Creates the baseline over a base program.
    #[must_use]
    pub fn new(base_program: impl Into<String>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            base_program: base_program.into(),
            evaluator,
        }
    }

    /// One fresh parse; a malformed program surfaces as a solver-level
    /// failure since this baseline has no compile phase to report it from.
    fn parse_fresh(&self) -> Result<ProgramTemplate, SolverError> {
        ProgramTemplate::parse(&self.base_program).map_err(|err| SolverError::Malformed {
            reason: err.to_string(),
        })
    }

    /// Runs with feedback re-derived from raw solver output at each step
    /// and manually accumulated into the evidence for the next one.
    ///
    /// This is the oracle for the precompiled feedback chain: same inputs,
    /// same generator, no artifact and no intermediate query indirection.
    ///
    /// # Errors
    ///
    /// `QueryError::FeedbackUnavailable` if a step other than the last
    /// fails; `QueryError::Solver` if the program itself is malformed.
    pub fn run_with_feedback(
        &self,
        queries: &[Query],
        events: &EventLog,
        generator: &FeedbackGenerator,
    ) -> Result<ExecutionResult, QueryError> {
        let plan = partition_queries(queries);
        if plan.is_empty() {
            return Ok(ExecutionResult::new());
        }

        let mut accumulated = events.clone();
        let mut result = ExecutionResult::new();
        let steps: Vec<(i64, &Vec<&Query>)> = plan.iter().map(|(t, qs)| (*t, qs)).collect();

        for (idx, &(timestamp, step_queries)) in steps.iter().enumerate() {
            let template = self.parse_fresh().map_err(|source| QueryError::Solver {
                timestamp,
                source,
            })?;
            let window = template.history_window();
            let evidence = accumulated.clauses_between(timestamp - window, timestamp);
            let fragment = compose_fragment(template.ground_at(timestamp), &evidence, step_queries);

            let started = Instant::now();
            match self.evaluator.evaluate(&fragment) {
                Ok(map) => {
                    let feedback = generator
                        .generate_from_raw(&map, timestamp)
                        .map_err(|err| QueryError::Solver {
                            timestamp,
                            source: SolverError::Internal {
                                message: format!("feedback derivation failed: {err}"),
                            },
                        })?;
                    for clause in feedback {
                        accumulated.push(clause);
                    }
                    let status = collect_step(&mut result, timestamp, step_queries, Ok(map));
                    result.report.record(timestamp, status, started.elapsed());
                }
                Err(source) => {
                    let status =
                        collect_step(&mut result, timestamp, step_queries, Err(source.clone()));
                    result.report.record(timestamp, status, started.elapsed());

                    if idx + 1 == steps.len() {
                        return Ok(result);
                    }
                    for (later, _) in &steps[idx + 1..] {
                        result
                            .report
                            .record(*later, StepStatus::Halted, std::time::Duration::ZERO);
                    }
                    return Err(QueryError::FeedbackUnavailable { timestamp, source });
                }
            }
        }

        Ok(result)
    }
}

impl ExecutionStrategy for IterativeStrategy {
    fn name(&self) -> &'static str {
        "iterative"
    }

    fn run(&self, queries: &[Query], events: &EventLog) -> Result<ExecutionResult, QueryError> {
        let plan = partition_queries(queries);
        if plan.is_empty() {
            return Ok(ExecutionResult::new());
        }

        let mut result = ExecutionResult::new();
        for (timestamp, step_queries) in &plan {
            let template = self.parse_fresh().map_err(|source| QueryError::Solver {
                timestamp: *timestamp,
                source,
            })?;
            let window = template.history_window();
            let evidence = events.clauses_between(timestamp - window, *timestamp);
            let fragment = compose_fragment(template.ground_at(*timestamp), &evidence, step_queries);

            let started = Instant::now();
            let outcome = self.evaluator.evaluate(&fragment);
            let status = collect_step(&mut result, *timestamp, step_queries, outcome);
            result.report.record(*timestamp, status, started.elapsed());
        }

        Ok(result)
    }
}
