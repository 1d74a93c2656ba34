//! Error types for temporalog.
//!
//! All errors are strongly typed using thiserror. The taxonomy separates
//! compile-time failures (fatal, never retried) from per-timestep query
//! failures (recoverable or locally contained), so callers can pattern
//! match on the specific condition.

use thiserror::Error;

use crate::clause::QueryId;
use crate::solver::SolverError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Probability value {value} is out of range [0.0, 1.0]")]
    ProbabilityOutOfRange {
        value: f64,
    },

    #[error("Predicate cannot be empty")]
    EmptyPredicate,

    #[error("Invalid predicate '{predicate}': must start with a lowercase letter and contain only letters, digits and underscores")]
    InvalidPredicate {
        predicate: String,
    },

    #[error("Feedback lag must be at least 1, got {lag}")]
    InvalidLag {
        lag: i64,
    },
}

/// Compile-time failures. Fatal: the program or seed must change before a
/// retry can succeed.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Parse error at line {line_no}: {reason} in '{line}'")]
    Parse {
        line_no: usize,
        line: String,
        reason: String,
    },

    #[error("Program text contains no clauses")]
    EmptyProgram,

    #[error("Seed does not cover predicate '{predicate}': it is neither defined by the program nor establishable as evidence")]
    SeedCoverage {
        predicate: String,
    },

    #[error("Failed to read program from '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Per-run query failures.
///
/// `MissingPredicate` is recoverable by recompiling with a wider seed.
/// `Solver` is contained to one timestep unless feedback depended on it, in
/// which case it surfaces as `FeedbackUnavailable`.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Predicate '{predicate}' at timestamp {timestamp} is not covered by the artifact (recompile with a wider seed)")]
    MissingPredicate {
        predicate: String,
        timestamp: i64,
        query_id: Option<QueryId>,
    },

    #[error("Solver failed at timestamp {timestamp}: {source}")]
    Solver {
        timestamp: i64,
        #[source]
        source: SolverError,
    },

    #[error("Feedback unavailable from timestamp {timestamp}: {source}")]
    FeedbackUnavailable {
        timestamp: i64,
        #[source]
        source: SolverError,
    },

    #[error("Result already contains an entry for '{predicate}' at timestamp {timestamp}")]
    DuplicateResultKey {
        predicate: String,
        timestamp: i64,
    },

    #[error("Feedback chain steps must ascend: got timestamp {timestamp} after {last}")]
    NonAscendingStep {
        timestamp: i64,
        last: i64,
    },

    #[error("Evaluation queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Evaluation worker pool disconnected")]
    Disconnected,
}

/// Top-level error type for temporalog.
#[derive(Debug, Error)]
pub enum TemporalogError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl TemporalogError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a compile-time error.
    #[must_use]
    pub const fn is_compile(&self) -> bool {
        matches!(self, Self::Compile(_))
    }

    /// Returns true if this is a query-time error.
    #[must_use]
    pub const fn is_query(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    /// Returns true if this error is retryable.
    ///
    /// Only solver timeouts are: compile and validation failures will not
    /// change on retry, and coverage gaps need a wider seed first.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Query(QueryError::Solver {
                source: SolverError::Timeout { .. },
                ..
            })
        )
    }
}

/// Result type alias for temporalog operations.
pub type TemporalogResult<T> = Result<T, TemporalogError>;
