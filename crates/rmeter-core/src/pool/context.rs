use std::{fmt, time::Instant};

use tokio::sync::watch;
use tracing::trace;

use crate::{
    metrics::{MetricsHandle, TaskOutcome},
    task::{TaskError, TaskResult},
};

/// What a worker knows about its place in the pool.
#[derive(Clone)]
pub struct WorkerContext {
    slot: usize,
    pool: &'static str,
    metrics: MetricsHandle,
}

impl WorkerContext {
    pub fn new(slot: usize, pool: &'static str, metrics: MetricsHandle) -> Self {
        Self { slot, pool, metrics }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Factory kind label (`"local"`, `"process"`).
    pub fn pool(&self) -> &'static str {
        self.pool
    }

    /// Count a worker-level failure such as a crash or a kill.
    pub fn report(&self, kind: &str) {
        self.metrics.record_worker_error(self.pool, kind);
    }

    pub(crate) fn completion(&self, tx: watch::Sender<Option<TaskResult>>) -> Completion {
        self.metrics.record_task_started(self.pool);
        Completion {
            tx: Some(tx),
            pool: self.pool,
            metrics: self.metrics.clone(),
            started: Instant::now(),
        }
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("slot", &self.slot)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Resolves the caller's future exactly once.
///
/// A completion dropped without [`Completion::complete`] resolves the task as a worker failure,
/// so a caller never waits on a task its worker lost.
pub struct Completion {
    tx: Option<watch::Sender<Option<TaskResult>>>,
    pool: &'static str,
    metrics: MetricsHandle,
    started: Instant,
}

impl Completion {
    pub fn complete(mut self, result: TaskResult) {
        self.finish(result);
    }

    fn finish(&mut self, result: TaskResult) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let elapsed = self.started.elapsed();
        let outcome = TaskOutcome::of(&result);
        self.metrics
            .record_task_completed(self.pool, outcome, u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        trace!(pool = self.pool, outcome = outcome.as_label(), ?elapsed, "task completed");
        tx.send_replace(Some(result));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.finish(Err(TaskError::worker("worker lost the task before reporting a result")));
    }
}
