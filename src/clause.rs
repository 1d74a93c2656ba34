//! Timestamped evidence and query value types.
//!
//! These are the immutable inputs of every run: an `InputClause` asserts
//! that a predicate holds at a timestamp with some probability, and a
//! `Query` asks for the probability of a predicate at a timestamp. Both
//! render themselves into program-fragment text through the
//! `ToProgramFragment` capability, so the engine never needs to branch on a
//! runtime "clause kind".

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::probability::Probability;

/// Opaque identifier for a query, carried through results and errors for
/// diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(uuid::Uuid);

impl QueryId {
    /// Creates a new random query ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validates a predicate name for embedding into program text.
///
/// Predicates are lowercase identifiers: anything else would change the
/// meaning of the generated fragment.
pub(crate) fn validate_predicate(predicate: &str) -> Result<(), ValidationError> {
    if predicate.is_empty() {
        return Err(ValidationError::EmptyPredicate);
    }
    let mut chars = predicate.chars();
    let first = chars.next().unwrap_or('_');
    if !first.is_ascii_lowercase() {
        return Err(ValidationError::InvalidPredicate {
            predicate: predicate.to_string(),
        });
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidPredicate {
            predicate: predicate.to_string(),
        });
    }
    Ok(())
}

/// Renders a value as a fragment of program text.
pub trait ToProgramFragment {
    /// Returns the program-text form, including the trailing period.
    fn to_program_fragment(&self) -> String;
}

/// A probability query for one predicate at one timestamp.
///
/// Immutable; created by the caller before a run and never mutated.
///
/// # Examples
///
/// ```
/// use temporalog::{Query, ToProgramFragment};
///
/// let q = Query::new("odd", 3).unwrap();
/// assert_eq!(q.to_program_fragment(), "query(odd(3)).");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// The queried predicate.
    pub predicate: String,

    /// The timestep the query targets.
    pub timestamp: i64,

    /// Identifier carried through results and errors.
    pub id: QueryId,
}

impl Query {
    /// Creates a query with a fresh ID.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the predicate is not a valid lowercase
    /// identifier.
    pub fn new(predicate: impl Into<String>, timestamp: i64) -> Result<Self, ValidationError> {
        let predicate = predicate.into();
        validate_predicate(&predicate)?;
        Ok(Self {
            predicate,
            timestamp,
            id: QueryId::new(),
        })
    }

    /// Creates a query with a caller-supplied ID.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the predicate is not a valid lowercase
    /// identifier.
    pub fn with_id(
        predicate: impl Into<String>,
        timestamp: i64,
        id: QueryId,
    ) -> Result<Self, ValidationError> {
        let predicate = predicate.into();
        validate_predicate(&predicate)?;
        Ok(Self {
            predicate,
            timestamp,
            id,
        })
    }
}

impl ToProgramFragment for Query {
    fn to_program_fragment(&self) -> String {
        format!("query({}({})).", self.predicate, self.timestamp)
    }
}

/// A piece of evidence: a predicate holds at a timestamp with the given
/// probability.
///
/// Immutable; created by the caller or by the feedback generator.
///
/// # Examples
///
/// ```
/// use temporalog::{InputClause, ToProgramFragment};
///
/// let c = InputClause::new("one", 0, 0.5).unwrap();
/// assert_eq!(c.to_program_fragment(), "evidence(one(0), 0.5).");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputClause {
    /// The evidenced predicate.
    pub predicate: String,

    /// The timestep the evidence applies to.
    pub timestamp: i64,

    /// Probability the predicate holds at that timestep.
    pub probability: Probability,
}

impl InputClause {
    /// Creates an input clause with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the predicate is invalid or the
    /// probability is out of range.
    pub fn new(
        predicate: impl Into<String>,
        timestamp: i64,
        probability: f64,
    ) -> Result<Self, ValidationError> {
        let predicate = predicate.into();
        validate_predicate(&predicate)?;
        Ok(Self {
            predicate,
            timestamp,
            probability: Probability::new(probability)?,
        })
    }

    /// Creates an input clause from an already-validated probability.
    #[must_use]
    pub fn from_probability(
        predicate: String,
        timestamp: i64,
        probability: Probability,
    ) -> Self {
        Self {
            predicate,
            timestamp,
            probability,
        }
    }
}

impl ToProgramFragment for InputClause {
    fn to_program_fragment(&self) -> String {
        format!(
            "evidence({}({}), {}).",
            self.predicate, self.timestamp, self.probability
        )
    }
}

/// A timestamped atom of either kind.
///
/// The engine partitions mixed inputs by timestamp; this tagged union lets
/// it do so without dynamic dispatch on a runtime clause kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimedAtom {
    /// Evidence.
    Clause(InputClause),

    /// A query.
    Query(Query),
}

impl TimedAtom {
    /// The predicate of the underlying atom.
    #[must_use]
    pub fn predicate(&self) -> &str {
        match self {
            Self::Clause(c) => &c.predicate,
            Self::Query(q) => &q.predicate,
        }
    }

    /// The timestamp of the underlying atom.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        match self {
            Self::Clause(c) => c.timestamp,
            Self::Query(q) => q.timestamp,
        }
    }
}

impl ToProgramFragment for TimedAtom {
    fn to_program_fragment(&self) -> String {
        match self {
            Self::Clause(c) => c.to_program_fragment(),
            Self::Query(q) => q.to_program_fragment(),
        }
    }
}

impl From<InputClause> for TimedAtom {
    fn from(clause: InputClause) -> Self {
        Self::Clause(clause)
    }
}

impl From<Query> for TimedAtom {
    fn from(query: Query) -> Self {
        Self::Query(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_fragment_form() {
        let q = Query::new("at_time", -2).unwrap();
        assert_eq!(q.to_program_fragment(), "query(at_time(-2)).");
    }

    #[test]
    fn clause_fragment_form() {
        let c = InputClause::new("increase", 4, 0.25).unwrap();
        assert_eq!(c.to_program_fragment(), "evidence(increase(4), 0.25).");
    }

    #[test]
    fn predicate_validation() {
        assert!(Query::new("", 0).is_err());
        assert!(Query::new("Odd", 0).is_err());
        assert!(Query::new("odd even", 0).is_err());
        assert!(Query::new("odd(1).", 0).is_err());
        assert!(Query::new("odd_2", 0).is_ok());
    }

    #[test]
    fn clause_probability_validation() {
        assert!(InputClause::new("one", 0, -0.5).is_err());
        assert!(InputClause::new("one", 0, 1.5).is_err());
        assert!(InputClause::new("one", 0, 0.5).is_ok());
    }

    #[test]
    fn query_ids_are_unique() {
        let a = Query::new("odd", 0).unwrap();
        let b = Query::new("odd", 0).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn timed_atom_accessors() {
        let atom: TimedAtom = InputClause::new("one", 7, 0.1).unwrap().into();
        assert_eq!(atom.predicate(), "one");
        assert_eq!(atom.timestamp(), 7);

        let atom: TimedAtom = Query::new("odd", 9).unwrap().into();
        assert_eq!(atom.predicate(), "odd");
        assert_eq!(atom.timestamp(), 9);
    }

    #[test]
    fn timed_atom_fragment_dispatch() {
        let clause: TimedAtom = InputClause::new("one", 1, 0.5).unwrap().into();
        let query: TimedAtom = Query::new("odd", 1).unwrap().into();
        assert_eq!(clause.to_program_fragment(), "evidence(one(1), 0.5).");
        assert_eq!(query.to_program_fragment(), "query(odd(1)).");
    }

    #[test]
    fn serialization_round_trip() {
        let c = InputClause::new("one", 3, 0.5).unwrap();
        let json = serde_json::to_string(&c).unwrap();
        let back: InputClause = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);

        let atom: TimedAtom = c.into();
        let json = serde_json::to_string(&atom).unwrap();
        assert!(json.contains("\"kind\":\"clause\""));
    }
}
