//! Benchmark harness for the precompiled query path.
//!
//! Compiles a built-in weighted-die scenario once, then for every timestep
//! count `N` up to the requested maximum runs the precompiled path over `N`
//! timesteps and prints a `N,elapsed_seconds` CSV line to stdout.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use temporalog::{
    compile, InputClause, Query, QueryRunner, ReferenceSolver, RunnerConfig, TemporalogError,
};

const DICE_PROGRAM: &str = "\
odd(T) :- one(T).
odd(T) :- three(T).
odd(T) :- five(T).
even(T) :- two(T).
even(T) :- four(T).
even(T) :- six(T).
";

const FACES: [&str; 6] = ["one", "two", "three", "four", "five", "six"];

#[derive(Debug, Parser)]
#[command(
    name = "temporalog-bench",
    about = "Measure precompiled query throughput over growing timestep counts"
)]
struct Args {
    /// Maximum number of timesteps to benchmark.
    max_timesteps: u32,

    /// Number of evaluation workers.
    #[arg(long, default_value_t = 2)]
    workers: usize,
}

fn scenario(timesteps: i64) -> Result<(Vec<Query>, Vec<InputClause>), TemporalogError> {
    let mut queries = Vec::new();
    let mut events = Vec::new();
    for t in 0..timesteps {
        queries.push(Query::new("odd", t)?);
        queries.push(Query::new("even", t)?);
        for face in FACES {
            events.push(InputClause::new(face, t, 1.0 / 6.0)?);
        }
    }
    Ok((queries, events))
}

fn run(args: &Args) -> Result<(), TemporalogError> {
    let (seed_queries, seed_clauses) = {
        let (queries, clauses) = scenario(1)?;
        (queries, clauses)
    };
    let artifact = compile(DICE_PROGRAM, &seed_clauses, &seed_queries)?;

    let runner = QueryRunner::new(
        Arc::new(ReferenceSolver::new()),
        RunnerConfig {
            workers: args.workers,
            ..RunnerConfig::default()
        },
    );

    for n in 1..=i64::from(args.max_timesteps) {
        let (queries, events) = scenario(n)?;
        let started = Instant::now();
        runner.perform_queries(&artifact, &queries, events, false)?;
        let elapsed = started.elapsed();
        println!("{n},{:.6}", elapsed.as_secs_f64());
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("temporalog-bench: {err}");
            ExitCode::FAILURE
        }
    }
}
