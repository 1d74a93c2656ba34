//! Precompilation: build once, instantiate per timestep.
//!
//! [`compile`] turns a base program plus a canonical seed (the timestamp-0
//! clauses and queries that establish every predicate the caller will ever
//! evidence or query) into a [`PrecompiledArtifact`]: the static dependency
//! shape of the program, generalized over timestamps. The artifact is
//! immutable — structural sharing through `Arc` is safe for any number of
//! concurrent readers — and its lifetime is owned by the caller; there is
//! no hidden process-wide cache. [`ArtifactCache`] is the explicit,
//! caller-owned memo for workloads that compile the same inputs repeatedly.
//!
//! Artifact lifecycle: nothing exists before `compile` returns (a failed
//! compile leaves nothing behind), and [`PrecompiledArtifact::discard`]
//! consumes the value, so no query can observe a discarded artifact.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::clause::{InputClause, Query, ToProgramFragment};
use crate::error::{CompileError, QueryError};
use crate::program::{compose_fragment, ProgramTemplate};

/// Content hash identifying an artifact's inputs.
///
/// Two compilations with the same program structure and seed produce the
/// same fingerprint; incidental whitespace does not change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    fn of(template: &ProgramTemplate, seed_clauses: &[InputClause], seed_queries: &[Query]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(template.normalized().as_bytes());

        let mut clause_lines: BTreeSet<String> = seed_clauses
            .iter()
            .map(ToProgramFragment::to_program_fragment)
            .collect();
        let query_lines: BTreeSet<String> = seed_queries
            .iter()
            .map(ToProgramFragment::to_program_fragment)
            .collect();
        clause_lines.extend(query_lines);
        for line in &clause_lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }

        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The reusable compiled form of a base program.
///
/// Holds the parsed template and the coverage index derived from the seed:
/// which predicates may be queried and which may be evidenced at any
/// timestamp. Read-only after construction.
#[derive(Debug, Clone)]
pub struct PrecompiledArtifact {
    template: ProgramTemplate,
    queryable: BTreeSet<String>,
    evidencable: BTreeSet<String>,
    fingerprint: Fingerprint,
    built_at: DateTime<Utc>,
}

/// Compiles a base program against its seed.
///
/// The seed establishes, at a canonical timestamp, every predicate later
/// runs will query or evidence; the compiled artifact generalizes that
/// shape to arbitrary timestamps.
///
/// Compilation is idempotent: identical inputs produce artifacts with
/// identical fingerprints that instantiate identical fragments.
///
/// # Errors
///
/// Returns `CompileError` if the program text does not parse, or if a seed
/// query predicate is neither defined by the program nor establishable as
/// evidence.
pub fn compile(
    base_program: &str,
    seed_clauses: &[InputClause],
    seed_queries: &[Query],
) -> Result<PrecompiledArtifact, CompileError> {
    let template = ProgramTemplate::parse(base_program)?;

    let evidencable: BTreeSet<String> = seed_clauses
        .iter()
        .map(|c| c.predicate.clone())
        .collect();
    let queryable: BTreeSet<String> = seed_queries
        .iter()
        .map(|q| q.predicate.clone())
        .collect();

    for predicate in &queryable {
        if !template.defined_predicates().contains(predicate)
            && !evidencable.contains(predicate)
        {
            return Err(CompileError::SeedCoverage {
                predicate: predicate.clone(),
            });
        }
    }

    let fingerprint = Fingerprint::of(&template, seed_clauses, seed_queries);

    Ok(PrecompiledArtifact {
        template,
        queryable,
        evidencable,
        fingerprint,
        built_at: Utc::now(),
    })
}

impl PrecompiledArtifact {
    /// Returns true if queries against this predicate are covered.
    #[must_use]
    pub fn covers_query(&self, predicate: &str) -> bool {
        self.queryable.contains(predicate)
    }

    /// Returns true if evidence for this predicate is covered.
    #[must_use]
    pub fn covers_evidence(&self, predicate: &str) -> bool {
        self.evidencable.contains(predicate)
    }

    /// The artifact's input fingerprint.
    #[must_use]
    pub const fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// When the artifact was built.
    #[must_use]
    pub const fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// How many timesteps back grounded rules may reach; the runner feeds
    /// evidence for this window into each step's fragment.
    #[must_use]
    pub const fn history_window(&self) -> i64 {
        self.template.history_window()
    }

    /// Instantiates a program fragment for one timestep.
    ///
    /// Grounds the template at `timestamp` and appends the given evidence
    /// and query fragments. Evidence timestamps are taken as provided; the
    /// caller decides the window.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::MissingPredicate` if a query or evidence
    /// predicate is outside the artifact's coverage — the caller must
    /// recompile with a wider seed.
    pub fn instantiate(
        &self,
        timestamp: i64,
        evidence: &[InputClause],
        queries: &[&Query],
    ) -> Result<String, QueryError> {
        for query in queries {
            if !self.covers_query(&query.predicate) {
                return Err(QueryError::MissingPredicate {
                    predicate: query.predicate.clone(),
                    timestamp: query.timestamp,
                    query_id: Some(query.id),
                });
            }
        }
        for clause in evidence {
            if !self.covers_evidence(&clause.predicate) {
                return Err(QueryError::MissingPredicate {
                    predicate: clause.predicate.clone(),
                    timestamp: clause.timestamp,
                    query_id: None,
                });
            }
        }

        Ok(compose_fragment(
            self.template.ground_at(timestamp),
            evidence,
            queries,
        ))
    }

    /// Discards the artifact.
    ///
    /// Consuming the value is terminal: no further instantiation is
    /// possible through any remaining handle, because none remains.
    pub fn discard(self) {
        drop(self);
    }
}

/// Explicit, caller-owned compilation memo.
///
/// Keyed by a hash of the raw inputs; bounded — when full, the cache is
/// cleared rather than grown.
pub struct ArtifactCache {
    max_entries: usize,
    entries: RwLock<HashMap<Fingerprint, Arc<PrecompiledArtifact>>>,
}

const ARTIFACT_CACHE_MAX: usize = 64;

impl ArtifactCache {
    /// Creates a cache with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(ARTIFACT_CACHE_MAX)
    }

    /// Creates a cache bounded at `max_entries`.
    #[must_use]
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn input_key(
        base_program: &str,
        seed_clauses: &[InputClause],
        seed_queries: &[Query],
    ) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(base_program.as_bytes());
        let mut lines: BTreeSet<String> = seed_clauses
            .iter()
            .map(ToProgramFragment::to_program_fragment)
            .collect();
        lines.extend(
            seed_queries
                .iter()
                .map(ToProgramFragment::to_program_fragment),
        );
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        Fingerprint(*hasher.finalize().as_bytes())
    }

    /// Returns the cached artifact for these inputs, compiling on a miss.
    ///
    /// # Errors
    ///
    /// Returns `CompileError` from a failed compilation; failures are not
    /// cached.
    pub fn get_or_compile(
        &self,
        base_program: &str,
        seed_clauses: &[InputClause],
        seed_queries: &[Query],
    ) -> Result<Arc<PrecompiledArtifact>, CompileError> {
        let key = Self::input_key(base_program, seed_clauses, seed_queries);

        {
            let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(artifact) = guard.get(&key) {
                return Ok(Arc::clone(artifact));
            }
        }

        let artifact = Arc::new(compile(base_program, seed_clauses, seed_queries)?);

        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if guard.len() >= self.max_entries {
            guard.clear();
        }
        // Another thread may have compiled the same inputs meanwhile.
        let entry = guard.entry(key).or_insert_with(|| Arc::clone(&artifact));
        Ok(Arc::clone(entry))
    }

    /// Number of cached artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DICE: &str = "\
odd(T) :- one(T).
odd(T) :- three(T).
odd(T) :- five(T).
even(T) :- two(T).
even(T) :- four(T).
even(T) :- six(T).
";

    fn dice_seed() -> (Vec<InputClause>, Vec<Query>) {
        let clauses = ["one", "two", "three", "four", "five", "six"]
            .iter()
            .map(|p| InputClause::new(*p, 0, 1.0 / 6.0).unwrap())
            .collect();
        let queries = vec![Query::new("odd", 0).unwrap(), Query::new("even", 0).unwrap()];
        (clauses, queries)
    }

    #[test]
    fn compile_builds_coverage_from_seed() {
        let (clauses, queries) = dice_seed();
        let artifact = compile(DICE, &clauses, &queries).unwrap();

        assert!(artifact.covers_query("odd"));
        assert!(artifact.covers_query("even"));
        assert!(!artifact.covers_query("one"));
        assert!(artifact.covers_evidence("one"));
        assert!(!artifact.covers_evidence("odd"));
        assert_eq!(artifact.history_window(), 0);
    }

    #[test]
    fn compile_rejects_unresolvable_seed_queries() {
        let (clauses, mut queries) = dice_seed();
        queries.push(Query::new("prime", 0).unwrap());

        let err = compile(DICE, &clauses, &queries).unwrap_err();
        let CompileError::SeedCoverage { predicate } = err else {
            panic!("expected SeedCoverage, got {err:?}");
        };
        assert_eq!(predicate, "prime");
    }

    #[test]
    fn seed_queries_may_target_evidence_predicates() {
        let (clauses, mut queries) = dice_seed();
        // "one" is not defined by the program but is establishable as evidence.
        queries.push(Query::new("one", 0).unwrap());
        assert!(compile(DICE, &clauses, &queries).is_ok());
    }

    #[test]
    fn compilation_is_idempotent() {
        let (clauses, queries) = dice_seed();
        let a = compile(DICE, &clauses, &queries).unwrap();
        let b = compile(DICE, &clauses, &queries).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let evidence = vec![InputClause::new("one", 3, 0.5).unwrap()];
        let query = Query::new("odd", 3).unwrap();
        let fa = a.instantiate(3, &evidence, &[&query]).unwrap();
        let fb = b.instantiate(3, &evidence, &[&query]).unwrap();
        assert_eq!(fa, fb);
    }

    #[test]
    fn fingerprint_ignores_incidental_whitespace() {
        let (clauses, queries) = dice_seed();
        let spaced = DICE.replace(" :- ", "   :-  ");
        let a = compile(DICE, &clauses, &queries).unwrap();
        let b = compile(&spaced, &clauses, &queries).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_seed() {
        let (clauses, queries) = dice_seed();
        let a = compile(DICE, &clauses, &queries).unwrap();
        let b = compile(DICE, &clauses, &queries[..1].to_vec()).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn instantiate_grounds_and_appends() {
        let (clauses, queries) = dice_seed();
        let artifact = compile(DICE, &clauses, &queries).unwrap();

        let evidence = vec![
            InputClause::new("one", 2, 0.5).unwrap(),
            InputClause::new("three", 2, 0.5).unwrap(),
        ];
        let query = Query::new("odd", 2).unwrap();
        let fragment = artifact.instantiate(2, &evidence, &[&query]).unwrap();

        assert!(fragment.contains("odd(2) :- one(2)."));
        assert!(fragment.contains("evidence(one(2), 0.5)."));
        assert!(fragment.contains("query(odd(2))."));
        assert!(!fragment.contains("odd(T)"));
    }

    #[test]
    fn instantiate_rejects_uncovered_query_predicates() {
        let (clauses, queries) = dice_seed();
        let artifact = compile(DICE, &clauses, &queries).unwrap();

        let query = Query::new("prime", 5).unwrap();
        let err = artifact.instantiate(5, &[], &[&query]).unwrap_err();
        let QueryError::MissingPredicate { predicate, timestamp, query_id } = err else {
            panic!("expected MissingPredicate, got {err:?}");
        };
        assert_eq!(predicate, "prime");
        assert_eq!(timestamp, 5);
        assert_eq!(query_id, Some(query.id));
    }

    #[test]
    fn instantiate_rejects_uncovered_evidence_predicates() {
        let (clauses, queries) = dice_seed();
        let artifact = compile(DICE, &clauses, &queries).unwrap();

        let evidence = vec![InputClause::new("seven", 5, 0.5).unwrap()];
        let query = Query::new("odd", 5).unwrap();
        let err = artifact.instantiate(5, &evidence, &[&query]).unwrap_err();
        let QueryError::MissingPredicate { predicate, query_id, .. } = err else {
            panic!("expected MissingPredicate, got {err:?}");
        };
        assert_eq!(predicate, "seven");
        assert_eq!(query_id, None);
    }

    #[test]
    fn discard_consumes_the_artifact() {
        let (clauses, queries) = dice_seed();
        let artifact = compile(DICE, &clauses, &queries).unwrap();
        artifact.discard();
        // `artifact` is moved; any further use would fail to compile.
    }

    #[test]
    fn cache_returns_shared_artifact_on_hit() {
        let (clauses, queries) = dice_seed();
        let cache = ArtifactCache::new();

        let a = cache.get_or_compile(DICE, &clauses, &queries).unwrap();
        let b = cache.get_or_compile(DICE, &clauses, &queries).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_is_bounded() {
        let (clauses, queries) = dice_seed();
        let cache = ArtifactCache::with_capacity(2);

        for t in 0..3 {
            // Vary the seed so each compilation keys differently.
            let mut q = queries.clone();
            q.push(Query::new("odd", t).unwrap());
            cache.get_or_compile(DICE, &clauses, &q).unwrap();
        }
        assert!(cache.len() <= 2);
    }

    #[test]
    fn cache_does_not_cache_failures() {
        let cache = ArtifactCache::new();
        let queries = vec![Query::new("prime", 0).unwrap()];
        assert!(cache.get_or_compile(DICE, &[], &queries).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn fingerprint_displays_as_hex() {
        let (clauses, queries) = dice_seed();
        let artifact = compile(DICE, &clauses, &queries).unwrap();
        let hex = artifact.fingerprint().to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
