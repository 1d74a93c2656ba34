//! Execution results.
//!
//! An [`ExecutionResult`] maps `(predicate, timestamp)` to a probability,
//! one set of entries per evaluated timestep. Keys are unique: `insert`
//! refuses to overwrite and `update` is the explicit overwrite path, so no
//! timestep can silently clobber another's results. Queries a solver
//! failure left unanswered are recorded as unresolved entries with a
//! reason, and the [`RunReport`] keeps per-step status and timing.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clause::QueryId;
use crate::error::QueryError;
use crate::probability::Probability;

/// Identifier for one run of the query runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(uuid::Uuid);

impl RunId {
    /// Creates a new random run ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of one result entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    /// Queried predicate.
    pub predicate: String,

    /// Queried timestep.
    pub timestamp: i64,
}

impl ResultKey {
    /// Creates a result key.
    #[must_use]
    pub fn new(predicate: impl Into<String>, timestamp: i64) -> Self {
        Self {
            predicate: predicate.into(),
            timestamp,
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.predicate, self.timestamp)
    }
}

/// A query that produced no probability, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedQuery {
    /// Queried predicate.
    pub predicate: String,

    /// Queried timestep.
    pub timestamp: i64,

    /// The query's identifier.
    pub query_id: QueryId,

    /// Why the query went unanswered.
    pub reason: String,
}

/// Outcome of one evaluated timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// All queries at the timestep resolved.
    Resolved,

    /// The solver failed; the step's queries are unresolved.
    Unresolved,

    /// Never evaluated: an earlier step's failure blocked its feedback.
    Halted,
}

/// Status and timing for one timestep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// The timestep.
    pub timestamp: i64,

    /// What happened to it.
    pub status: StepStatus,

    /// Wall time spent evaluating, in milliseconds.
    pub elapsed_ms: u64,
}

/// Metadata for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: RunId,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Per-timestep outcomes, in evaluation order.
    pub steps: Vec<StepReport>,
}

impl RunReport {
    /// Creates a report stamped now.
    #[must_use]
    pub fn started_now() -> Self {
        Self {
            run_id: RunId::new(),
            started_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    /// Records one step outcome.
    pub fn record(&mut self, timestamp: i64, status: StepStatus, elapsed: Duration) {
        self.steps.push(StepReport {
            timestamp,
            status,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::started_now()
    }
}

mod entries_serde {
    use super::{BTreeMap, Probability, ResultKey};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Entry {
        predicate: String,
        timestamp: i64,
        probability: Probability,
    }

    pub fn serialize<S: Serializer>(
        entries: &BTreeMap<ResultKey, Probability>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(entries.len()))?;
        for (key, probability) in entries {
            seq.serialize_element(&Entry {
                predicate: key.predicate.clone(),
                timestamp: key.timestamp,
                probability: *probability,
            })?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ResultKey, Probability>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| (ResultKey::new(e.predicate, e.timestamp), e.probability))
            .collect())
    }
}

/// The accumulated outcome of a run: probabilities per `(predicate,
/// timestamp)`, unresolved queries, and the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(with = "entries_serde")]
    entries: BTreeMap<ResultKey, Probability>,

    unresolved: Vec<UnresolvedQuery>,

    /// Run metadata.
    pub report: RunReport,
}

impl ExecutionResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            unresolved: Vec::new(),
            report: RunReport::started_now(),
        }
    }

    /// Inserts a new entry.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::DuplicateResultKey` if the key already has a
    /// probability; use [`update`](Self::update) to overwrite explicitly.
    pub fn insert(&mut self, key: ResultKey, probability: Probability) -> Result<(), QueryError> {
        if self.entries.contains_key(&key) {
            return Err(QueryError::DuplicateResultKey {
                predicate: key.predicate,
                timestamp: key.timestamp,
            });
        }
        self.entries.insert(key, probability);
        Ok(())
    }

    /// Sets an entry, overwriting any existing probability. Returns the
    /// previous value if there was one.
    pub fn update(&mut self, key: ResultKey, probability: Probability) -> Option<Probability> {
        self.entries.insert(key, probability)
    }

    /// Looks up the probability for a predicate at a timestep.
    #[must_use]
    pub fn probability(&self, predicate: &str, timestamp: i64) -> Option<Probability> {
        self.entries
            .get(&ResultKey::new(predicate, timestamp))
            .copied()
    }

    /// Iterates all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResultKey, Probability)> {
        self.entries.iter().map(|(k, p)| (k, *p))
    }

    /// Iterates the resolved entries at one timestep.
    pub fn entries_at(&self, timestamp: i64) -> impl Iterator<Item = (&str, Probability)> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.timestamp == timestamp)
            .map(|(k, p)| (k.predicate.as_str(), *p))
    }

    /// Number of resolved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a query the solver left unanswered.
    pub fn mark_unresolved(
        &mut self,
        predicate: impl Into<String>,
        timestamp: i64,
        query_id: QueryId,
        reason: impl Into<String>,
    ) {
        self.unresolved.push(UnresolvedQuery {
            predicate: predicate.into(),
            timestamp,
            query_id,
            reason: reason.into(),
        });
    }

    /// Records an already-built unresolved entry.
    pub(crate) fn push_unresolved(&mut self, entry: UnresolvedQuery) {
        self.unresolved.push(entry);
    }

    /// Queries that produced no probability.
    #[must_use]
    pub fn unresolved(&self) -> &[UnresolvedQuery] {
        &self.unresolved
    }

    /// Merges another result into this one.
    ///
    /// The merge is commutative over entries because keys are unique per
    /// `(predicate, timestamp)`.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::DuplicateResultKey` if both results carry the
    /// same key.
    pub fn merge(&mut self, other: Self) -> Result<(), QueryError> {
        for (key, probability) in other.entries {
            self.insert(key, probability)?;
        }
        self.unresolved.extend(other.unresolved);
        self.report.steps.extend(other.report.steps);
        self.report.steps.sort_by_key(|s| s.timestamp);
        if other.report.started_at < self.report.started_at {
            self.report.started_at = other.report.started_at;
        }
        Ok(())
    }

    /// Serializes the result to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(value: f64) -> Probability {
        Probability::new(value).unwrap()
    }

    #[test]
    fn insert_rejects_duplicate_keys() {
        let mut result = ExecutionResult::new();
        result.insert(ResultKey::new("odd", 0), p(0.5)).unwrap();

        let err = result.insert(ResultKey::new("odd", 0), p(0.6)).unwrap_err();
        let QueryError::DuplicateResultKey { predicate, timestamp } = err else {
            panic!("expected DuplicateResultKey, got {err:?}");
        };
        assert_eq!(predicate, "odd");
        assert_eq!(timestamp, 0);

        // The original value is untouched.
        assert_eq!(result.probability("odd", 0), Some(p(0.5)));
    }

    #[test]
    fn update_is_the_explicit_overwrite_path() {
        let mut result = ExecutionResult::new();
        result.insert(ResultKey::new("odd", 0), p(0.5)).unwrap();

        let previous = result.update(ResultKey::new("odd", 0), p(0.7));
        assert_eq!(previous, Some(p(0.5)));
        assert_eq!(result.probability("odd", 0), Some(p(0.7)));
    }

    #[test]
    fn entries_at_filters_by_timestep() {
        let mut result = ExecutionResult::new();
        result.insert(ResultKey::new("odd", 0), p(0.5)).unwrap();
        result.insert(ResultKey::new("even", 0), p(0.5)).unwrap();
        result.insert(ResultKey::new("odd", 1), p(0.3)).unwrap();

        let at_zero: Vec<_> = result.entries_at(0).collect();
        assert_eq!(at_zero.len(), 2);
        assert!(at_zero.iter().all(|(_, prob)| prob.value() == 0.5));
    }

    #[test]
    fn merge_is_commutative_on_disjoint_keys() {
        let mut a = ExecutionResult::new();
        a.insert(ResultKey::new("odd", 0), p(0.5)).unwrap();
        let mut b = ExecutionResult::new();
        b.insert(ResultKey::new("odd", 1), p(0.3)).unwrap();

        let mut ab = a.clone();
        ab.merge(b.clone()).unwrap();
        let mut ba = b;
        ba.merge(a).unwrap();

        let ab_entries: Vec<_> = ab.iter().map(|(k, v)| (k.clone(), v)).collect();
        let ba_entries: Vec<_> = ba.iter().map(|(k, v)| (k.clone(), v)).collect();
        assert_eq!(ab_entries, ba_entries);
    }

    #[test]
    fn merge_rejects_colliding_keys() {
        let mut a = ExecutionResult::new();
        a.insert(ResultKey::new("odd", 0), p(0.5)).unwrap();
        let mut b = ExecutionResult::new();
        b.insert(ResultKey::new("odd", 0), p(0.6)).unwrap();

        assert!(matches!(
            a.merge(b),
            Err(QueryError::DuplicateResultKey { .. })
        ));
    }

    #[test]
    fn unresolved_entries_carry_reasons() {
        let mut result = ExecutionResult::new();
        let id = QueryId::new();
        result.mark_unresolved("odd", 3, id, "solver timed out");

        assert!(result.is_empty());
        assert_eq!(result.unresolved().len(), 1);
        assert_eq!(result.unresolved()[0].query_id, id);
        assert!(result.unresolved()[0].reason.contains("timed out"));
    }

    #[test]
    fn report_records_steps() {
        let mut report = RunReport::started_now();
        report.record(0, StepStatus::Resolved, Duration::from_millis(12));
        report.record(1, StepStatus::Halted, Duration::ZERO);

        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].status, StepStatus::Resolved);
        assert_eq!(report.steps[0].elapsed_ms, 12);
        assert_eq!(report.steps[1].status, StepStatus::Halted);
    }

    #[test]
    fn serialization_round_trip() {
        let mut result = ExecutionResult::new();
        result.insert(ResultKey::new("odd", 0), p(0.5)).unwrap();
        result.mark_unresolved("even", 1, QueryId::new(), "solver failed");

        let json = result.to_json().unwrap();
        let text = json.to_string();
        assert!(text.contains("\"predicate\":\"odd\""));

        let back: ExecutionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.probability("odd", 0), Some(p(0.5)));
        assert_eq!(back.unresolved().len(), 1);
    }
}
