//! Program templates: the minimal clause structure the engine needs.
//!
//! The full probabilistic-logic grammar is the solver's concern; this module
//! parses just enough structure to precompile — weighted facts and rules
//! over a single time variable — and to ground that structure at concrete
//! timesteps.
//!
//! Line forms:
//!
//! ```text
//! % comment
//! 0.5::coin(T).
//! start(0).
//! odd(T) :- one(T).
//! at_time(T) :- was_at_time(T), keep(T).
//! chain(T) :- chain(T-1), step(T).
//! ```
//!
//! Every atom carries exactly one time argument: the variable `T`
//! (optionally offset, `T-1`), or an integer literal pinning the clause to a
//! fixed timestep. Multiple rules with the same head are alternatives.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::clause::{InputClause, Query, ToProgramFragment};
use crate::error::CompileError;
use crate::probability::Probability;

fn atom_regex() -> &'static Regex {
    static ATOM_RE: OnceLock<Regex> = OnceLock::new();
    ATOM_RE.get_or_init(|| {
        Regex::new(r"^([a-z][A-Za-z0-9_]*)\(\s*(T(?:\s*[+-]\s*\d+)?|-?\d+)\s*\)$")
            .expect("atom regex is valid")
    })
}

/// The time argument of a template atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTerm {
    /// The time variable `T` plus a constant offset.
    Var {
        /// Offset added to the grounding timestep (`T-1` is offset -1).
        offset: i64,
    },

    /// A fixed timestep.
    Const(i64),
}

impl TimeTerm {
    fn parse(text: &str) -> Option<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(rest) = compact.strip_prefix('T') {
            if rest.is_empty() {
                return Some(Self::Var { offset: 0 });
            }
            let offset: i64 = rest.parse().ok()?;
            return Some(Self::Var { offset });
        }
        compact.parse().ok().map(Self::Const)
    }

    /// Resolves the term at a concrete timestep.
    #[must_use]
    pub const fn ground(self, t: i64) -> i64 {
        match self {
            Self::Var { offset } => t + offset,
            Self::Const(c) => c,
        }
    }
}

/// An atom inside a template clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateAtom {
    /// Predicate name.
    pub predicate: String,

    /// Time argument.
    pub time: TimeTerm,
}

impl TemplateAtom {
    fn parse(text: &str) -> Option<Self> {
        let caps = atom_regex().captures(text.trim())?;
        let time = TimeTerm::parse(&caps[2])?;
        Some(Self {
            predicate: caps[1].to_string(),
            time,
        })
    }

    fn ground(&self, t: i64) -> String {
        format!("{}({})", self.predicate, self.time.ground(t))
    }
}

/// One clause of a program template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateClause {
    /// A weighted fact.
    Fact {
        /// Probability the fact holds.
        weight: Probability,
        /// The fact atom.
        atom: TemplateAtom,
    },

    /// A rule; its head holds when every body atom holds.
    Rule {
        /// Head atom.
        head: TemplateAtom,
        /// Conjunctive body.
        body: Vec<TemplateAtom>,
    },
}

impl TemplateClause {
    fn ground(&self, t: i64) -> String {
        match self {
            Self::Fact { weight, atom } => {
                if weight.value() >= 1.0 {
                    format!("{}.", atom.ground(t))
                } else {
                    format!("{}::{}.", weight, atom.ground(t))
                }
            }
            Self::Rule { head, body } => {
                let body: Vec<String> = body.iter().map(|a| a.ground(t)).collect();
                format!("{} :- {}.", head.ground(t), body.join(", "))
            }
        }
    }
}

/// A parsed program: the static structure compiled once and grounded many
/// times.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramTemplate {
    clauses: Vec<TemplateClause>,
    defined: std::collections::BTreeSet<String>,
    history_window: i64,
}

impl ProgramTemplate {
    /// Parses program text into a template.
    ///
    /// # Errors
    ///
    /// Returns `CompileError::Parse` on the first malformed line, or
    /// `CompileError::EmptyProgram` if no clauses remain after stripping
    /// comments and blank lines.
    pub fn parse(text: &str) -> Result<Self, CompileError> {
        let mut clauses = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            let clause = Self::parse_line(line).map_err(|reason| CompileError::Parse {
                line_no: idx + 1,
                line: line.to_string(),
                reason,
            })?;
            clauses.push(clause);
        }

        if clauses.is_empty() {
            return Err(CompileError::EmptyProgram);
        }

        let mut defined = std::collections::BTreeSet::new();
        let mut history_window = 0i64;
        for clause in &clauses {
            match clause {
                TemplateClause::Fact { atom, .. } => {
                    defined.insert(atom.predicate.clone());
                }
                TemplateClause::Rule { head, body } => {
                    defined.insert(head.predicate.clone());
                    for atom in body {
                        if let TimeTerm::Var { offset } = atom.time {
                            history_window = history_window.max(-offset);
                        }
                    }
                }
            }
        }

        Ok(Self {
            clauses,
            defined,
            history_window,
        })
    }

    fn parse_line(line: &str) -> Result<TemplateClause, String> {
        let Some(stripped) = line.strip_suffix('.') else {
            return Err("missing terminating period".to_string());
        };

        if let Some((head, body)) = stripped.split_once(":-") {
            let head = TemplateAtom::parse(head.trim_end())
                .ok_or_else(|| "malformed rule head".to_string())?;
            if matches!(head.time, TimeTerm::Var { offset } if offset != 0) {
                return Err("rule head must use the bare time variable T".to_string());
            }
            let mut atoms = Vec::new();
            for part in body.split(',') {
                let atom = TemplateAtom::parse(part)
                    .ok_or_else(|| format!("malformed body atom '{}'", part.trim()))?;
                atoms.push(atom);
            }
            if atoms.is_empty() {
                return Err("rule body is empty".to_string());
            }
            return Ok(TemplateClause::Rule { head, body: atoms });
        }

        let (weight, atom_text) = match stripped.split_once("::") {
            Some((w, rest)) => {
                let value: f64 = w
                    .trim()
                    .parse()
                    .map_err(|_| format!("malformed weight '{}'", w.trim()))?;
                let weight = Probability::new(value)
                    .map_err(|e| format!("invalid weight: {e}"))?;
                (weight, rest)
            }
            None => (Probability::ONE, stripped),
        };

        let atom =
            TemplateAtom::parse(atom_text).ok_or_else(|| "malformed fact atom".to_string())?;
        Ok(TemplateClause::Fact { weight, atom })
    }

    /// Predicates defined by the program (rule heads and facts).
    #[must_use]
    pub const fn defined_predicates(&self) -> &std::collections::BTreeSet<String> {
        &self.defined
    }

    pub(crate) fn clauses(&self) -> &[TemplateClause] {
        &self.clauses
    }

    /// How many timesteps back a grounded rule may reach (largest negative
    /// body offset).
    #[must_use]
    pub const fn history_window(&self) -> i64 {
        self.history_window
    }

    /// Number of clauses in the template.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Returns true if the template holds no clauses.
    ///
    /// Parsing never produces an empty template; this exists for symmetry
    /// with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Grounds every clause at one timestep.
    #[must_use]
    pub fn ground_at(&self, t: i64) -> Vec<String> {
        self.clauses.iter().map(|c| c.ground(t)).collect()
    }

    /// Grounds every clause at each of the given timesteps, deduplicating
    /// timestep-pinned clauses.
    #[must_use]
    pub fn ground_many<'a>(&self, timesteps: impl IntoIterator<Item = &'a i64>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut lines = Vec::new();
        for &t in timesteps {
            for line in self.ground_at(t) {
                if seen.insert(line.clone()) {
                    lines.push(line);
                }
            }
        }
        lines
    }

    /// Canonical single-string form of the template, independent of
    /// incidental whitespace in the source text.
    #[must_use]
    pub fn normalized(&self) -> String {
        // Grounding the variable with offset arithmetic would change the
        // clause text; render templates with T intact instead.
        let mut out = String::new();
        for clause in &self.clauses {
            let line = match clause {
                TemplateClause::Fact { weight, atom } => {
                    let time = render_time(atom.time);
                    if weight.value() >= 1.0 {
                        format!("{}({time}).", atom.predicate)
                    } else {
                        format!("{}::{}({time}).", weight, atom.predicate)
                    }
                }
                TemplateClause::Rule { head, body } => {
                    let body: Vec<String> = body
                        .iter()
                        .map(|a| format!("{}({})", a.predicate, render_time(a.time)))
                        .collect();
                    format!("{}({}) :- {}.", head.predicate, render_time(head.time), body.join(", "))
                }
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn render_time(time: TimeTerm) -> String {
    match time {
        TimeTerm::Var { offset: 0 } => "T".to_string(),
        TimeTerm::Var { offset } if offset > 0 => format!("T+{offset}"),
        TimeTerm::Var { offset } => format!("T{offset}"),
        TimeTerm::Const(c) => c.to_string(),
    }
}

/// Assembles grounded clauses, evidence and queries into one program
/// fragment for the evaluator.
pub(crate) fn compose_fragment(
    grounded: Vec<String>,
    evidence: &[InputClause],
    queries: &[&Query],
) -> String {
    let mut lines = grounded;

    let mut seen = HashSet::new();
    for clause in evidence {
        let line = clause.to_program_fragment();
        if seen.insert(line.clone()) {
            lines.push(line);
        }
    }

    let mut queried = HashSet::new();
    for query in queries {
        if queried.insert((query.predicate.clone(), query.timestamp)) {
            lines.push(query.to_program_fragment());
        }
    }

    let mut fragment = lines.join("\n");
    fragment.push('\n');
    fragment
}

/// Reads program text from a file.
///
/// # Errors
///
/// Returns `CompileError::Io` when the file cannot be read.
pub fn load_program(path: impl AsRef<Path>) -> Result<String, CompileError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.display().to_string(),
        source,
    })
}
