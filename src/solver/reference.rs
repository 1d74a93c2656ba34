//! Built-in exact solver for the restricted ground fragment.
//!
//! `ReferenceSolver` evaluates the fragment shape the engine emits:
//! grounded weighted facts, grounded conjunctive rules (alternatives summed
//! with saturation — the mutually exclusive reading), `evidence(...)`
//! overrides and `query(...)` requests. Conjunction multiplies
//! (independence reading). It exists so the engine is testable and usable
//! stand-alone; production deployments plug a weighted-model-counting
//! solver in behind the [`Evaluator`](super::Evaluator) trait instead.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::program::{ProgramTemplate, TemplateClause, TimeTerm};

use super::{EvaluationMap, Evaluator, SolverError};

type Atom = (String, i64);

fn evidence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^evidence\(\s*([a-z][A-Za-z0-9_]*)\(\s*(-?\d+)\s*\)\s*,\s*([^\s,)]+)\s*\)\.$",
        )
        .expect("evidence regex is valid")
    })
}

fn query_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^query\(\s*([a-z][A-Za-z0-9_]*)\(\s*(-?\d+)\s*\)\s*\)\.$")
            .expect("query regex is valid")
    })
}

#[derive(Debug, Default)]
struct Fragment {
    facts: BTreeMap<Atom, f64>,
    rules: BTreeMap<Atom, Vec<Vec<Atom>>>,
    evidence: BTreeMap<Atom, f64>,
    queries: BTreeSet<Atom>,
}

impl Fragment {
    fn parse(text: &str) -> Result<Self, SolverError> {
        let mut fragment = Self::default();
        let mut clause_lines = String::new();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }

            if let Some(caps) = evidence_regex().captures(line) {
                let atom = (caps[1].to_string(), parse_timestamp(&caps[2])?);
                let value: f64 = caps[3].parse().map_err(|_| SolverError::Malformed {
                    reason: format!("invalid evidence probability in '{line}'"),
                })?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(SolverError::Malformed {
                        reason: format!("evidence probability {value} out of range in '{line}'"),
                    });
                }
                if let Some(existing) = fragment.evidence.get(&atom) {
                    if (existing - value).abs() > 1e-12 {
                        return Err(SolverError::Malformed {
                            reason: format!(
                                "conflicting evidence for {}({}): {existing} vs {value}",
                                atom.0, atom.1
                            ),
                        });
                    }
                } else {
                    fragment.evidence.insert(atom, value);
                }
                continue;
            }

            if let Some(caps) = query_regex().captures(line) {
                fragment
                    .queries
                    .insert((caps[1].to_string(), parse_timestamp(&caps[2])?));
                continue;
            }

            clause_lines.push_str(line);
            clause_lines.push('\n');
        }

        if !clause_lines.is_empty() {
            let template =
                ProgramTemplate::parse(&clause_lines).map_err(|e| SolverError::Malformed {
                    reason: e.to_string(),
                })?;
            fragment.load_clauses(&template)?;
        }

        Ok(fragment)
    }

    fn load_clauses(&mut self, template: &ProgramTemplate) -> Result<(), SolverError> {
        for clause in template.clauses() {
            match clause {
                TemplateClause::Fact { weight, atom } => {
                    let atom = ground_atom(&atom.predicate, atom.time)?;
                    let entry = self.facts.entry(atom).or_insert(0.0);
                    *entry = (*entry + weight.value()).min(1.0);
                }
                TemplateClause::Rule { head, body } => {
                    let head = ground_atom(&head.predicate, head.time)?;
                    let body = body
                        .iter()
                        .map(|a| ground_atom(&a.predicate, a.time))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.rules.entry(head).or_default().push(body);
                }
            }
        }
        Ok(())
    }
}

fn parse_timestamp(text: &str) -> Result<i64, SolverError> {
    text.parse().map_err(|_| SolverError::Malformed {
        reason: format!("invalid timestamp '{text}'"),
    })
}

fn ground_atom(predicate: &str, time: TimeTerm) -> Result<Atom, SolverError> {
    match time {
        TimeTerm::Const(t) => Ok((predicate.to_string(), t)),
        TimeTerm::Var { .. } => Err(SolverError::Malformed {
            reason: format!("fragment atom '{predicate}' still carries the time variable"),
        }),
    }
}

/// Exact evaluator for the restricted ground fragment.
///
/// # Examples
///
/// ```
/// use temporalog::{Evaluator, ReferenceSolver};
///
/// let fragment = "\
/// odd(0) :- one(0).
/// odd(0) :- three(0).
/// evidence(one(0), 0.2).
/// evidence(three(0), 0.3).
/// query(odd(0)).
/// ";
/// let map = ReferenceSolver::new().evaluate(fragment).unwrap();
/// assert!((map[&("odd".to_string(), 0)] - 0.5).abs() < 1e-9);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceSolver;

impl ReferenceSolver {
    /// Creates a reference solver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn resolve(
        fragment: &Fragment,
        atom: &Atom,
        memo: &mut BTreeMap<Atom, f64>,
        visiting: &mut HashSet<Atom>,
    ) -> Result<f64, SolverError> {
        if let Some(value) = fragment.evidence.get(atom) {
            return Ok(*value);
        }
        if let Some(value) = memo.get(atom) {
            return Ok(*value);
        }
        if !visiting.insert(atom.clone()) {
            return Err(SolverError::CyclicDependency {
                predicate: atom.0.clone(),
                timestamp: atom.1,
            });
        }

        let fact = fragment.facts.get(atom).copied();
        let bodies = fragment.rules.get(atom);
        if fact.is_none() && bodies.is_none() {
            visiting.remove(atom);
            return Err(SolverError::UnknownAtom {
                predicate: atom.0.clone(),
                timestamp: atom.1,
            });
        }

        let mut total = fact.unwrap_or(0.0);
        if let Some(bodies) = bodies {
            for body in bodies {
                let mut product = 1.0;
                for part in body {
                    product *= Self::resolve(fragment, part, memo, visiting)?;
                }
                total = (total + product).min(1.0);
            }
        }

        visiting.remove(atom);
        memo.insert(atom.clone(), total);
        Ok(total)
    }
}

impl Evaluator for ReferenceSolver {
    fn evaluate(&self, program: &str) -> Result<EvaluationMap, SolverError> {
        let fragment = Fragment::parse(program)?;

        let mut memo = BTreeMap::new();
        let mut results = EvaluationMap::new();
        for atom in &fragment.queries {
            let mut visiting = HashSet::new();
            let value = Self::resolve(&fragment, atom, &mut memo, &mut visiting)?;
            results.insert(atom.clone(), value);
        }
        Ok(results)
    }
}
