//! Bounded worker pool for evaluator calls.
//!
//! Evaluation may block for an arbitrary time, so calls run on dedicated
//! named threads behind bounded channels. The handle supports waiting with
//! a timeout; an abandoned call finishes on its worker and its reply is
//! dropped, which is safe because the artifact the fragment came from is
//! immutable. Dropping the pool closes the queue and joins every worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::QueryError;
use crate::solver::{EvaluationMap, Evaluator, SolverError};

struct EvalJob {
    fragment: String,
    reply: Sender<Result<EvaluationMap, SolverError>>,
}

pub(crate) struct EvalPool {
    tx: Option<Sender<EvalJob>>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl EvalPool {
    pub(crate) fn start(workers: usize, capacity: usize, evaluator: Arc<dyn Evaluator>) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<EvalJob>(capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<EvalJob> = rx.clone();
            let evaluator = Arc::clone(&evaluator);
            let name = format!("temporalog-eval-{idx}");
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        let result = evaluator.evaluate(&job.fragment);
                        // The receiver may have timed out and gone away.
                        let _ = job.reply.send(result);
                    }
                })
                .expect("failed to spawn temporalog evaluation worker");
            handles.push(handle);
        }

        Self {
            tx: Some(tx),
            workers: handles,
            capacity,
        }
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn try_submit(&self, fragment: String) -> Result<EvalHandle, QueryError> {
        let (reply, rx) = bounded::<Result<EvaluationMap, SolverError>>(1);
        let job = EvalJob { fragment, reply };
        let Some(tx) = &self.tx else {
            return Err(QueryError::Disconnected);
        };
        match tx.try_send(job) {
            Ok(()) => Ok(EvalHandle { rx }),
            Err(TrySendError::Full(_)) => Err(QueryError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(QueryError::Disconnected),
        }
    }
}

impl Drop for EvalPool {
    fn drop(&mut self) {
        // Close the channel: workers drain queued jobs, then exit.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

pub(crate) struct EvalHandle {
    rx: Receiver<Result<EvaluationMap, SolverError>>,
}

impl EvalHandle {
    /// Waits for the evaluation, optionally bounded by a timeout.
    ///
    /// Timeouts and a vanished worker both surface as `SolverError`, so a
    /// step failure stays contained to its timestep.
    pub(crate) fn join(self, timeout: Option<Duration>) -> Result<EvaluationMap, SolverError> {
        match timeout {
            Some(limit) => self.rx.recv_timeout(limit).map_err(|err| match err {
                RecvTimeoutError::Timeout => SolverError::Timeout {
                    waited_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                },
                RecvTimeoutError::Disconnected => SolverError::Internal {
                    message: "evaluation worker disconnected".to_string(),
                },
            })?,
            None => self.rx.recv().map_err(|_| SolverError::Internal {
                message: "evaluation worker disconnected".to_string(),
            })?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::solver::reference::ReferenceSolver;

    struct SleepyEvaluator(Duration);

    impl Evaluator for SleepyEvaluator {
        fn evaluate(&self, _program: &str) -> Result<EvaluationMap, SolverError> {
            thread::sleep(self.0);
            Ok(EvaluationMap::new())
        }
    }

    #[test]
    fn submits_and_joins() {
        let pool = EvalPool::start(1, 4, Arc::new(ReferenceSolver::new()));
        let handle = pool
            .try_submit("0.5::coin(0).\nquery(coin(0)).\n".to_string())
            .unwrap();
        let map = handle.join(None).unwrap();
        assert_eq!(map[&("coin".to_string(), 0)], 0.5);
    }

    #[test]
    fn queue_full_is_reported() {
        // One worker stuck sleeping, capacity 1: the second queued job fills
        // the channel and the third submit must fail fast.
        let pool = EvalPool::start(1, 1, Arc::new(SleepyEvaluator(Duration::from_millis(200))));
        let _first = pool.try_submit(String::new()).unwrap();
        let _second = match pool.try_submit(String::new()) {
            Ok(handle) => Some(handle),
            Err(QueryError::QueueFull { .. }) => None,
            Err(err) => panic!("unexpected error: {err:?}"),
        };

        let mut saw_full = false;
        for _ in 0..3 {
            if matches!(
                pool.try_submit(String::new()),
                Err(QueryError::QueueFull { capacity: 1 })
            ) {
                saw_full = true;
                break;
            }
        }
        assert!(saw_full);
    }

    #[test]
    fn join_timeout_surfaces_as_solver_timeout() {
        let pool = EvalPool::start(1, 4, Arc::new(SleepyEvaluator(Duration::from_millis(200))));
        let handle = pool.try_submit(String::new()).unwrap();
        let err = handle.join(Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, SolverError::Timeout { .. }));
    }

    #[test]
    fn drop_joins_workers() {
        let pool = EvalPool::start(2, 4, Arc::new(ReferenceSolver::new()));
        let handle = pool
            .try_submit("0.5::coin(0).\nquery(coin(0)).\n".to_string())
            .unwrap();
        drop(pool);
        // The queued job was drained before the workers exited.
        assert!(handle.join(Some(Duration::from_secs(1))).is_ok());
    }
}
