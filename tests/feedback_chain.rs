//! Feedback-chain fidelity on the position-tracker scenario.
//!
//! Boolean `increase`/`decrease` events drive `at_time(t)` across
//! timesteps; the previous step's result is carried forward as
//! `was_at_time` evidence. The chained precompiled path must reproduce the
//! iterative baseline that re-derives feedback straight from raw solver
//! output and accumulates it by hand.

use std::sync::Arc;

use temporalog::{
    compile, EventLog, ExecutionResult, FeedbackGenerator, InputClause, IterativeStrategy,
    PrecompiledArtifact, Query, QueryError, QueryRunner, ReferenceSolver, StepStatus,
};

const TOLERANCE: f64 = 1e-6;

const TRACKER: &str = "\
at_time(T) :- increase(T).
at_time(T) :- was_at_time(T), stay(T).
";

fn tracker_artifact() -> PrecompiledArtifact {
    let seed_clauses = vec![
        InputClause::new("increase", 0, 0.0).unwrap(),
        InputClause::new("stay", 0, 1.0).unwrap(),
        InputClause::new("was_at_time", 0, 0.0).unwrap(),
    ];
    let seed_queries = vec![Query::new("at_time", 0).unwrap()];
    compile(TRACKER, &seed_clauses, &seed_queries).unwrap()
}

fn tracker_generator() -> FeedbackGenerator {
    FeedbackGenerator::new()
        .rename("at_time", "was_at_time")
        .unwrap()
}

fn tracker_runner() -> QueryRunner {
    QueryRunner::with_defaults(Arc::new(ReferenceSolver::new())).with_feedback(tracker_generator())
}

/// Builds per-timestep evidence from boolean increase/decrease events.
/// A decrease clears the position (`stay = 0`), otherwise it persists.
fn boolean_events(steps: &[(bool, bool)]) -> Vec<InputClause> {
    let mut events = vec![InputClause::new("was_at_time", 0, 0.0).unwrap()];
    for (t, (increase, decrease)) in steps.iter().enumerate() {
        let t = i64::try_from(t).unwrap();
        events.push(InputClause::new("increase", t, f64::from(u8::from(*increase))).unwrap());
        events.push(InputClause::new("stay", t, f64::from(u8::from(!*decrease))).unwrap());
    }
    events
}

fn probabilistic_events(steps: &[(f64, f64)]) -> Vec<InputClause> {
    let mut events = vec![InputClause::new("was_at_time", 0, 0.0).unwrap()];
    for (t, (increase, stay)) in steps.iter().enumerate() {
        let t = i64::try_from(t).unwrap();
        events.push(InputClause::new("increase", t, *increase).unwrap());
        events.push(InputClause::new("stay", t, *stay).unwrap());
    }
    events
}

fn at_time_queries(timesteps: i64) -> Vec<Query> {
    (0..timesteps)
        .map(|t| Query::new("at_time", t).unwrap())
        .collect()
}

fn assert_agree(a: &ExecutionResult, b: &ExecutionResult) {
    assert_eq!(a.len(), b.len(), "paths resolved different key sets");
    for (key, probability) in a.iter() {
        let other = b
            .probability(&key.predicate, key.timestamp)
            .unwrap_or_else(|| panic!("missing entry for {key}"));
        assert!(
            probability.approx_eq(other, TOLERANCE),
            "{key}: {} vs {}",
            probability,
            other
        );
    }
}

#[test]
fn boolean_chain_follows_the_event_trajectory() {
    let artifact = tracker_artifact();
    let runner = tracker_runner();

    let steps = [
        (true, false),  // arrive
        (false, false), // hold
        (false, true),  // leave
        (true, false),  // arrive again
        (false, false), // hold
    ];
    let result = runner
        .perform_queries(
            &artifact,
            &at_time_queries(5),
            boolean_events(&steps),
            true,
        )
        .unwrap();

    let expected = [1.0, 1.0, 0.0, 1.0, 1.0];
    for (t, want) in expected.iter().enumerate() {
        let got = result
            .probability("at_time", i64::try_from(t).unwrap())
            .unwrap()
            .value();
        assert!((got - want).abs() <= TOLERANCE, "at_time({t}) = {got}");
    }
}

#[test]
fn chained_precompiled_path_matches_iterative_feedback_baseline() {
    let artifact = tracker_artifact();
    let runner = tracker_runner();

    let steps = [
        (0.5, 1.0),
        (0.0, 0.8),
        (0.25, 0.5),
        (0.0, 1.0),
        (0.1, 0.9),
        (0.0, 0.6),
    ];
    let queries = at_time_queries(6);
    let events: EventLog = probabilistic_events(&steps).into();

    let chained = runner
        .perform_queries(&artifact, &queries, events.clone(), true)
        .unwrap();

    let baseline = IterativeStrategy::new(TRACKER, Arc::new(ReferenceSolver::new()))
        .run_with_feedback(&queries, &events, &tracker_generator())
        .unwrap();

    assert_agree(&chained, &baseline);

    // Spot-check the head of the trajectory by hand:
    // at_time(0) = 0.5; at_time(1) = 0 + 0.5 * 0.8 = 0.4.
    assert!((chained.probability("at_time", 0).unwrap().value() - 0.5).abs() <= TOLERANCE);
    assert!((chained.probability("at_time", 1).unwrap().value() - 0.4).abs() <= TOLERANCE);
}

#[test]
fn independent_mode_cannot_carry_the_position_forward() {
    let artifact = tracker_artifact();
    let runner = tracker_runner();

    let steps = [(true, false), (false, false), (false, false)];
    let result = runner
        .perform_queries(
            &artifact,
            &at_time_queries(3),
            boolean_events(&steps),
            false,
        )
        .unwrap();

    // Only t=0 has `was_at_time` evidence; without feedback the later
    // steps cannot resolve and are reported, not silently dropped.
    assert!(result.probability("at_time", 0).is_some());
    assert_eq!(result.unresolved().len(), 2);
    assert!(result.unresolved().iter().all(|u| u.timestamp > 0));
}

#[test]
fn mid_chain_solver_failure_halts_the_run() {
    let artifact = tracker_artifact();
    let runner = tracker_runner();

    let steps = [(true, false), (false, false), (false, false), (true, false)];
    let mut events = boolean_events(&steps);
    // Strip timestep 1's evidence entirely: its solve must fail, and
    // everything after it depends on the missing feedback.
    events.retain(|c| c.timestamp != 1);

    let err = runner
        .perform_queries(&artifact, &at_time_queries(4), events, true)
        .unwrap_err();
    let QueryError::FeedbackUnavailable { timestamp, .. } = err else {
        panic!("expected FeedbackUnavailable, got {err:?}");
    };
    assert_eq!(timestamp, 1);
}

#[test]
fn final_step_failure_is_contained() {
    let artifact = tracker_artifact();
    let runner = tracker_runner();

    let steps = [(true, false), (false, false), (false, false)];
    let mut events = boolean_events(&steps);
    events.retain(|c| c.timestamp != 2);

    let result = runner
        .perform_queries(&artifact, &at_time_queries(3), events, true)
        .unwrap();

    // No later step needed t=2's feedback, so the run completes with that
    // step's queries unresolved.
    assert!(result.probability("at_time", 0).is_some());
    assert!(result.probability("at_time", 1).is_some());
    assert_eq!(result.unresolved().len(), 1);
    assert_eq!(result.unresolved()[0].timestamp, 2);

    let statuses: Vec<StepStatus> = result.report.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Resolved,
            StepStatus::Resolved,
            StepStatus::Unresolved
        ]
    );
}

#[test]
fn independent_chains_share_one_artifact() {
    let artifact = tracker_artifact();
    let runner = tracker_runner();

    let steps_a = [(true, false), (false, false), (false, true)];
    let steps_b = [(false, false), (true, false), (false, false)];
    let queries_a = at_time_queries(3);
    let queries_b = at_time_queries(3);

    let (a, b) = std::thread::scope(|scope| {
        let handle_a = scope.spawn(|| {
            runner
                .perform_queries(&artifact, &queries_a, boolean_events(&steps_a), true)
                .unwrap()
        });
        let handle_b = scope.spawn(|| {
            runner
                .perform_queries(&artifact, &queries_b, boolean_events(&steps_b), true)
                .unwrap()
        });
        (handle_a.join().unwrap(), handle_b.join().unwrap())
    });

    assert!((a.probability("at_time", 0).unwrap().value() - 1.0).abs() <= TOLERANCE);
    assert!((a.probability("at_time", 2).unwrap().value() - 0.0).abs() <= TOLERANCE);
    assert!((b.probability("at_time", 0).unwrap().value() - 0.0).abs() <= TOLERANCE);
    assert!((b.probability("at_time", 2).unwrap().value() - 1.0).abs() <= TOLERANCE);
}
