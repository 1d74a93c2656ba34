//! Feedback: turning one timestep's results into the next step's evidence.
//!
//! [`FeedbackGenerator`] is a pure mapping — each resolved query at
//! timestamp `t` becomes an [`InputClause`] at `t + lag`, optionally under
//! a renamed predicate so programs can tell carried-over results from
//! fresh queries. [`FeedbackChain`] is the explicit step loop built on top
//! of it: the caller drives `step` once per timestep, which makes every
//! suspension and cancellation point visible and lets independent chains
//! share one read-only artifact.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::artifact::PrecompiledArtifact;
use crate::clause::{validate_predicate, InputClause, Query};
use crate::error::{QueryError, ValidationError};
use crate::probability::Probability;
use crate::result::{ExecutionResult, ResultKey, UnresolvedQuery};
use crate::runner::QueryRunner;
use crate::solver::{EvaluationMap, SolverError};

/// Pure, deterministic mapping from resolved queries to next-step
/// evidence.
#[derive(Debug, Clone)]
pub struct FeedbackGenerator {
    lag: i64,
    rename: BTreeMap<String, String>,
}

impl FeedbackGenerator {
    /// Identity mapping with a lag of one timestep.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lag: 1,
            rename: BTreeMap::new(),
        }
    }

    /// Creates a generator with the given lag.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidLag` unless `lag >= 1`.
    pub fn with_lag(lag: i64) -> Result<Self, ValidationError> {
        if lag < 1 {
            return Err(ValidationError::InvalidLag { lag });
        }
        Ok(Self {
            lag,
            rename: BTreeMap::new(),
        })
    }

    /// Routes feedback for `from` to the predicate `to`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if either name is not a valid predicate.
    pub fn rename(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let from = from.into();
        let to = to.into();
        validate_predicate(&from)?;
        validate_predicate(&to)?;
        self.rename.insert(from, to);
        Ok(self)
    }

    /// The configured lag.
    #[must_use]
    pub const fn lag(&self) -> i64 {
        self.lag
    }

    fn target_predicate(&self, predicate: &str) -> String {
        self.rename
            .get(predicate)
            .cloned()
            .unwrap_or_else(|| predicate.to_string())
    }

    /// Maps the resolved entries at `timestamp` to evidence at
    /// `timestamp + lag`.
    #[must_use]
    pub fn generate(&self, results: &ExecutionResult, timestamp: i64) -> Vec<InputClause> {
        results
            .entries_at(timestamp)
            .map(|(predicate, probability)| {
                InputClause::from_probability(
                    self.target_predicate(predicate),
                    timestamp + self.lag,
                    probability,
                )
            })
            .collect()
    }

    /// Maps raw evaluator output at `timestamp` to evidence at
    /// `timestamp + lag`.
    ///
    /// Values that overshoot [0, 1] by rounding are clamped.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ProbabilityOutOfRange` for NaN output.
    pub fn generate_from_raw(
        &self,
        raw: &EvaluationMap,
        timestamp: i64,
    ) -> Result<Vec<InputClause>, ValidationError> {
        let mut feedback = Vec::new();
        for ((predicate, t), value) in raw {
            if *t != timestamp {
                continue;
            }
            feedback.push(InputClause::from_probability(
                self.target_predicate(predicate),
                timestamp + self.lag,
                Probability::clamped(*value)?,
            ));
        }
        Ok(feedback)
    }
}

impl Default for FeedbackGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// What one chain step produced.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// The evaluated timestep.
    pub timestamp: i64,

    /// Resolved probabilities.
    pub resolved: Vec<(ResultKey, Probability)>,

    /// Queries the solver left unanswered.
    pub unresolved: Vec<UnresolvedQuery>,

    /// Evidence emitted for later steps.
    pub feedback: Vec<InputClause>,

    /// Wall time spent on this step.
    pub elapsed: Duration,
}

/// A strict sequential feedback chain over one artifact.
///
/// Steps must ascend; each step folds the carried feedback from the
/// previous step into its evidence. A solver failure poisons the chain —
/// later steps cannot be evaluated without the missing feedback and return
/// `QueryError::FeedbackUnavailable`.
pub struct FeedbackChain<'a> {
    runner: &'a QueryRunner,
    artifact: &'a PrecompiledArtifact,
    generator: FeedbackGenerator,
    carried: Vec<InputClause>,
    last: Option<i64>,
    halted: Option<(i64, SolverError)>,
}

impl<'a> FeedbackChain<'a> {
    /// Creates a chain over the given artifact.
    #[must_use]
    pub fn new(
        runner: &'a QueryRunner,
        artifact: &'a PrecompiledArtifact,
        generator: FeedbackGenerator,
    ) -> Self {
        Self {
            runner,
            artifact,
            generator,
            carried: Vec::new(),
            last: None,
            halted: None,
        }
    }

    /// Feedback emitted but not yet consumed.
    #[must_use]
    pub fn carried(&self) -> &[InputClause] {
        &self.carried
    }

    /// Evaluates one timestep and emits its feedback.
    ///
    /// # Errors
    ///
    /// - `QueryError::NonAscendingStep` if `timestamp` does not advance;
    /// - `QueryError::MissingPredicate` for uncovered predicates;
    /// - `QueryError::Solver` if the evaluator fails — the chain is then
    ///   poisoned and every later call returns
    ///   `QueryError::FeedbackUnavailable`.
    pub fn step(
        &mut self,
        timestamp: i64,
        evidence: &[InputClause],
        queries: &[&Query],
    ) -> Result<StepOutcome, QueryError> {
        if let Some((halted_at, source)) = &self.halted {
            return Err(QueryError::FeedbackUnavailable {
                timestamp: *halted_at,
                source: source.clone(),
            });
        }
        if let Some(last) = self.last {
            if timestamp <= last {
                return Err(QueryError::NonAscendingStep { timestamp, last });
            }
        }

        let window_start = timestamp - self.artifact.history_window();
        let mut step_evidence = evidence.to_vec();
        let mut future = Vec::new();
        for clause in &self.carried {
            if clause.timestamp > timestamp {
                future.push(clause.clone());
            } else if clause.timestamp >= window_start {
                step_evidence.push(clause.clone());
            }
            // Older carried feedback is out of the program's reach; drop it.
        }

        let fragment = self
            .artifact
            .instantiate(timestamp, &step_evidence, queries)?;

        let started = Instant::now();
        let map = match self.runner.evaluate_fragment(fragment) {
            Ok(map) => map,
            Err(err) => {
                self.halted = Some((timestamp, err.clone()));
                self.carried = future;
                return Err(QueryError::Solver {
                    timestamp,
                    source: err,
                });
            }
        };
        let elapsed = started.elapsed();

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for query in queries {
            if !seen.insert((query.predicate.as_str(), query.timestamp)) {
                continue;
            }
            let key = (query.predicate.clone(), query.timestamp);
            match map.get(&key).copied().map(Probability::clamped) {
                Some(Ok(probability)) => {
                    resolved.push((
                        ResultKey::new(query.predicate.clone(), query.timestamp),
                        probability,
                    ));
                }
                Some(Err(err)) => unresolved.push(UnresolvedQuery {
                    predicate: query.predicate.clone(),
                    timestamp: query.timestamp,
                    query_id: query.id,
                    reason: err.to_string(),
                }),
                None => unresolved.push(UnresolvedQuery {
                    predicate: query.predicate.clone(),
                    timestamp: query.timestamp,
                    query_id: query.id,
                    reason: "solver returned no value for the queried atom".to_string(),
                }),
            }
        }

        let feedback = self
            .generator
            .generate_from_raw(&map, timestamp)
            .map_err(|err| QueryError::Solver {
                timestamp,
                source: SolverError::Internal {
                    message: format!("feedback derivation failed: {err}"),
                },
            })?;

        self.carried = future;
        self.carried.extend(feedback.iter().cloned());
        self.last = Some(timestamp);

        Ok(StepOutcome {
            timestamp,
            resolved,
            unresolved,
            feedback,
            elapsed,
        })
    }
}

impl QueryRunner {
    /// Starts a feedback chain over `artifact` using this runner's
    /// configured generator.
    #[must_use]
    pub fn chain<'a>(&'a self, artifact: &'a PrecompiledArtifact) -> FeedbackChain<'a> {
        FeedbackChain::new(self, artifact, self.feedback_generator().clone())
    }
}
