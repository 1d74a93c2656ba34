//! Per-timestep query orchestration.
//!
//! [`QueryRunner`] partitions queries and evidence by timestamp and drives
//! the evaluator over the ascending timesteps. Without feedback the steps
//! are independent — they run on the worker pool and their results merge
//! commutatively, so evaluation order cannot change the outcome. With
//! feedback the steps form a strict chain: step `t+1` waits for the
//! feedback derived from step `t`, and a failure in the middle of the chain
//! halts everything after it.

mod pool;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::artifact::PrecompiledArtifact;
use crate::clause::{InputClause, Query};
use crate::error::QueryError;
use crate::feedback::FeedbackGenerator;
use crate::probability::Probability;
use crate::result::{ExecutionResult, ResultKey, StepStatus};
use crate::solver::{EvaluationMap, Evaluator, SolverError};

pub(crate) use pool::EvalPool;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of evaluation workers.
    pub workers: usize,

    /// Maximum queued evaluations.
    pub queue_capacity: usize,

    /// Per-call evaluation timeout. `None` waits indefinitely.
    pub solve_timeout: Option<std::time::Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
            solve_timeout: None,
        }
    }
}

/// Evidence for a run, indexed by timestamp.
///
/// Accepts either a flat clause list or an already-partitioned map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    by_timestamp: BTreeMap<i64, Vec<InputClause>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one clause.
    pub fn push(&mut self, clause: InputClause) {
        self.by_timestamp
            .entry(clause.timestamp)
            .or_default()
            .push(clause);
    }

    /// All clauses with timestamps in `[from, to]`, in timestamp order.
    #[must_use]
    pub fn clauses_between(&self, from: i64, to: i64) -> Vec<InputClause> {
        self.by_timestamp
            .range(from..=to)
            .flat_map(|(_, clauses)| clauses.iter().cloned())
            .collect()
    }

    /// Number of clauses in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_timestamp.values().map(Vec::len).sum()
    }

    /// Returns true if the log holds no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_timestamp.is_empty()
    }
}

impl From<Vec<InputClause>> for EventLog {
    fn from(clauses: Vec<InputClause>) -> Self {
        let mut log = Self::new();
        for clause in clauses {
            log.push(clause);
        }
        log
    }
}

impl From<&[InputClause]> for EventLog {
    fn from(clauses: &[InputClause]) -> Self {
        clauses.to_vec().into()
    }
}

impl From<BTreeMap<i64, Vec<InputClause>>> for EventLog {
    fn from(by_timestamp: BTreeMap<i64, Vec<InputClause>>) -> Self {
        Self { by_timestamp }
    }
}

/// Groups queries by ascending timestamp, deduplicating repeated
/// `(predicate, timestamp)` requests.
pub(crate) fn partition_queries(queries: &[Query]) -> BTreeMap<i64, Vec<&Query>> {
    let mut plan: BTreeMap<i64, Vec<&Query>> = BTreeMap::new();
    let mut seen: HashSet<(&str, i64)> = HashSet::new();
    for query in queries {
        if seen.insert((query.predicate.as_str(), query.timestamp)) {
            plan.entry(query.timestamp).or_default().push(query);
        }
    }
    plan
}

/// Drives an evaluator over the timesteps of a precompiled artifact.
pub struct QueryRunner {
    pool: EvalPool,
    config: RunnerConfig,
    feedback: FeedbackGenerator,
}

impl QueryRunner {
    /// Creates a runner with the given evaluator and configuration.
    #[must_use]
    pub fn new(evaluator: Arc<dyn Evaluator>, config: RunnerConfig) -> Self {
        let pool = EvalPool::start(config.workers, config.queue_capacity, evaluator);
        Self {
            pool,
            config,
            feedback: FeedbackGenerator::new(),
        }
    }

    /// Creates a runner with the default configuration.
    #[must_use]
    pub fn with_defaults(evaluator: Arc<dyn Evaluator>) -> Self {
        Self::new(evaluator, RunnerConfig::default())
    }

    /// Sets the feedback generator used when `use_feedback` is enabled.
    #[must_use]
    pub fn with_feedback(mut self, generator: FeedbackGenerator) -> Self {
        self.feedback = generator;
        self
    }

    /// The configured feedback generator.
    #[must_use]
    pub const fn feedback_generator(&self) -> &FeedbackGenerator {
        &self.feedback
    }

    /// Evaluates queries against a precompiled artifact.
    ///
    /// Partitions queries and evidence by timestamp and evaluates each
    /// timestep; with `use_feedback` each step's results are carried into
    /// the next step as evidence through the configured
    /// [`FeedbackGenerator`].
    ///
    /// An empty query set returns an empty result without invoking the
    /// evaluator.
    ///
    /// # Errors
    ///
    /// `QueryError::MissingPredicate` if a query or evidence predicate is
    /// outside the artifact's coverage. Solver failures on one timestep are
    /// recorded as unresolved entries and do not abort the run — unless
    /// `use_feedback` is set and a later step needed the failed step's
    /// feedback, which surfaces as `QueryError::FeedbackUnavailable`.
    pub fn perform_queries(
        &self,
        artifact: &PrecompiledArtifact,
        queries: &[Query],
        events: impl Into<EventLog>,
        use_feedback: bool,
    ) -> Result<ExecutionResult, QueryError> {
        let plan = partition_queries(queries);
        if plan.is_empty() {
            return Ok(ExecutionResult::new());
        }
        let events = events.into();

        if use_feedback {
            self.run_chained(artifact, &plan, &events)
        } else {
            self.run_independent(artifact, &plan, &events)
        }
    }

    /// Independent timesteps: pipelined through the worker pool, results
    /// merged by unique key.
    fn run_independent(
        &self,
        artifact: &PrecompiledArtifact,
        plan: &BTreeMap<i64, Vec<&Query>>,
        events: &EventLog,
    ) -> Result<ExecutionResult, QueryError> {
        let window = artifact.history_window();
        let mut result = ExecutionResult::new();
        let mut pending: VecDeque<(i64, Vec<&Query>, pool::EvalHandle, Instant)> = VecDeque::new();

        for (&timestamp, step_queries) in plan {
            let evidence = events.clauses_between(timestamp - window, timestamp);
            let fragment = artifact.instantiate(timestamp, &evidence, step_queries)?;

            // Keep in-flight work within the queue bound so submission
            // cannot hit backpressure mid-run.
            if pending.len() >= self.pool.capacity() {
                if let Some(step) = pending.pop_front() {
                    self.complete_step(&mut result, step);
                }
            }

            let handle = self.pool.try_submit(fragment)?;
            pending.push_back((timestamp, step_queries.clone(), handle, Instant::now()));
        }

        while let Some(step) = pending.pop_front() {
            self.complete_step(&mut result, step);
        }

        Ok(result)
    }

    fn complete_step(
        &self,
        result: &mut ExecutionResult,
        (timestamp, step_queries, handle, started): (i64, Vec<&Query>, pool::EvalHandle, Instant),
    ) {
        let outcome = handle.join(self.config.solve_timeout);
        let elapsed = started.elapsed();
        let status = collect_step(result, timestamp, &step_queries, outcome);
        result.report.record(timestamp, status, elapsed);
    }

    /// Feedback chain: strictly sequential, halts past a failed step.
    fn run_chained(
        &self,
        artifact: &PrecompiledArtifact,
        plan: &BTreeMap<i64, Vec<&Query>>,
        events: &EventLog,
    ) -> Result<ExecutionResult, QueryError> {
        let window = artifact.history_window();
        let steps: Vec<(i64, &Vec<&Query>)> = plan.iter().map(|(t, qs)| (*t, qs)).collect();
        let mut chain = crate::feedback::FeedbackChain::new(self, artifact, self.feedback.clone());
        let mut result = ExecutionResult::new();

        for (idx, &(timestamp, step_queries)) in steps.iter().enumerate() {
            let evidence = events.clauses_between(timestamp - window, timestamp);
            match chain.step(timestamp, &evidence, step_queries) {
                Ok(outcome) => {
                    let status = if outcome.unresolved.is_empty() {
                        StepStatus::Resolved
                    } else {
                        StepStatus::Unresolved
                    };
                    for (key, probability) in outcome.resolved {
                        result.insert(key, probability)?;
                    }
                    for entry in outcome.unresolved {
                        result.push_unresolved(entry);
                    }
                    result.report.record(timestamp, status, outcome.elapsed);
                }
                Err(QueryError::Solver { timestamp: failed, source }) => {
                    for query in step_queries {
                        result.mark_unresolved(
                            query.predicate.clone(),
                            query.timestamp,
                            query.id,
                            source.to_string(),
                        );
                    }
                    result
                        .report
                        .record(failed, StepStatus::Unresolved, std::time::Duration::ZERO);

                    if idx + 1 == steps.len() {
                        // No later step needed this feedback.
                        return Ok(result);
                    }
                    for (later, _) in &steps[idx + 1..] {
                        result
                            .report
                            .record(*later, StepStatus::Halted, std::time::Duration::ZERO);
                    }
                    return Err(QueryError::FeedbackUnavailable {
                        timestamp: failed,
                        source,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        Ok(result)
    }

    /// Runs one fragment through the pool with the configured timeout.
    pub(crate) fn evaluate_fragment(&self, fragment: String) -> Result<EvaluationMap, SolverError> {
        let handle = self
            .pool
            .try_submit(fragment)
            .map_err(|err| SolverError::Internal {
                message: err.to_string(),
            })?;
        handle.join(self.config.solve_timeout)
    }
}

/// Folds one step's evaluation outcome into the result, returning the step
/// status.
pub(crate) fn collect_step(
    result: &mut ExecutionResult,
    timestamp: i64,
    step_queries: &[&Query],
    outcome: Result<EvaluationMap, SolverError>,
) -> StepStatus {
    match outcome {
        Ok(map) => {
            let mut status = StepStatus::Resolved;
            for query in step_queries {
                let key = (query.predicate.clone(), query.timestamp);
                match map.get(&key).copied().map(Probability::clamped) {
                    Some(Ok(probability)) => {
                        let key = ResultKey::new(query.predicate.clone(), query.timestamp);
                        if result.insert(key, probability).is_err() {
                            // Partitioning dedupes; a collision here means two
                            // runs were merged into one result.
                            status = StepStatus::Unresolved;
                        }
                    }
                    Some(Err(err)) => {
                        result.mark_unresolved(
                            query.predicate.clone(),
                            query.timestamp,
                            query.id,
                            err.to_string(),
                        );
                        status = StepStatus::Unresolved;
                    }
                    None => {
                        result.mark_unresolved(
                            query.predicate.clone(),
                            query.timestamp,
                            query.id,
                            "solver returned no value for the queried atom",
                        );
                        status = StepStatus::Unresolved;
                    }
                }
            }
            status
        }
        Err(err) => {
            for query in step_queries {
                result.mark_unresolved(
                    query.predicate.clone(),
                    query.timestamp,
                    query.id,
                    QueryError::Solver {
                        timestamp,
                        source: err.clone(),
                    }
                    .to_string(),
                );
            }
            StepStatus::Unresolved
        }
    }
}
