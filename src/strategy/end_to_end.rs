//! The end-to-end baseline.
//!
//! Unrolls every queried timestep into one monolithic grounded fragment and
//! solves it in a single evaluator call. Correct for small runs; the
//! fragment grows with the timestep span, so it does not scale and exists
//! only for comparison.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::clause::Query;
use crate::error::QueryError;
use crate::program::{compose_fragment, ProgramTemplate};
use crate::result::{ExecutionResult, StepStatus};
use crate::runner::{collect_step, partition_queries, EventLog};
use crate::solver::{Evaluator, SolverError};

use super::ExecutionStrategy;

/// Solves all timesteps in one monolithic fragment.
pub struct EndToEndStrategy {
    base_program: String,
    evaluator: Arc<dyn Evaluator>,
}

impl EndToEndStrategy {
    /// Creates the baseline over a base program.
    #[must_use]
    pub fn new(base_program: impl Into<String>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            base_program: base_program.into(),
            evaluator,
        }
    }
}

impl ExecutionStrategy for EndToEndStrategy {
    fn name(&self) -> &'static str {
        "end_to_end"
    }

    fn run(&self, queries: &[Query], events: &EventLog) -> Result<ExecutionResult, QueryError> {
        let plan = partition_queries(queries);
        if plan.is_empty() {
            return Ok(ExecutionResult::new());
        }

        let first = *plan.keys().next().unwrap_or(&0);
        let last = *plan.keys().last().unwrap_or(&0);

        let template =
            ProgramTemplate::parse(&self.base_program).map_err(|err| QueryError::Solver {
                timestamp: first,
                source: SolverError::Malformed {
                    reason: err.to_string(),
                },
            })?;
        let window = template.history_window();

        // Ground the whole span so cross-timestep rules resolve inside the
        // single fragment instead of through per-step feedback.
        let span: BTreeSet<i64> = ((first - window)..=last).collect();
        // Monolithic solve: include every piece of evidence up to the last
        // queried step, not just the per-step windows.
        let evidence = events.clauses_between(i64::MIN, last);
        let all_queries: Vec<&Query> = plan.values().flatten().copied().collect();
        let fragment = compose_fragment(template.ground_many(span.iter()), &evidence, &all_queries);

        let mut result = ExecutionResult::new();
        let started = Instant::now();
        let outcome = self.evaluator.evaluate(&fragment);
        let elapsed = started.elapsed();

        match outcome {
            Ok(map) => {
                for (timestamp, step_queries) in &plan {
                    let status = collect_step(
                        &mut result,
                        *timestamp,
                        step_queries,
                        Ok(map.clone()),
                    );
                    result.report.record(*timestamp, status, elapsed);
                }
            }
            Err(err) => {
                // One solve means one failure domain: every query in the
                // run goes unresolved together.
                for (timestamp, step_queries) in &plan {
                    collect_step(&mut result, *timestamp, step_queries, Err(err.clone()));
                    result
                        .report
                        .record(*timestamp, StepStatus::Unresolved, elapsed);
                }
            }
        }

        Ok(result)
    }
}
