//! Caller-facing handle of one submitted measurement.
use std::fmt;

use tokio::sync::watch;

use rmeter_model::RunnerResult;

use crate::task::{TaskError, TaskResult};

const POOL_CLOSED: &str = "worker pool shut down before the measurement completed";

/// Pending or finished measurement.
///
/// Cheap to clone; every clone observes the same completion. [`RunnerFuture::result`]
/// never fails: timeouts and worker errors are folded into the returned [`RunnerResult`].
#[derive(Clone)]
pub struct RunnerFuture {
    id: String,
    timeout_sec: f64,
    rx: watch::Receiver<Option<TaskResult>>,
}

impl RunnerFuture {
    pub(crate) fn new(id: String, timeout_sec: f64, rx: watch::Receiver<Option<TaskResult>>) -> Self {
        Self { id, timeout_sec, rx }
    }

    #[cfg(test)]
    pub(crate) fn resolved(id: String, timeout_sec: f64, result: TaskResult) -> Self {
        let (_tx, rx) = watch::channel(Some(result));
        Self::new(id, timeout_sec, rx)
    }

    /// Task identifier, as it appears in logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Timeout this measurement was submitted with, in seconds.
    pub fn timeout_sec(&self) -> f64 {
        self.timeout_sec
    }

    /// `true` once the task has finished or the pool dropped it. Never blocks.
    pub fn done(&self) -> bool {
        let finished = self.rx.borrow().is_some();
        finished || self.rx.has_changed().is_err()
    }

    /// Wait for completion and translate the outcome.
    pub async fn result(&self) -> RunnerResult {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => self.translate(outcome.as_ref()),
            Err(_) => self.closed(),
        }
    }

    /// Outcome if already finished.
    pub fn try_result(&self) -> Option<RunnerResult> {
        if let Some(outcome) = self.rx.borrow().as_ref() {
            return Some(self.translate(Some(outcome)));
        }
        self.rx.has_changed().is_err().then(|| self.closed())
    }

    fn translate(&self, outcome: Option<&TaskResult>) -> RunnerResult {
        match outcome {
            Some(Ok(costs)) => RunnerResult::success(costs.clone()),
            // `{:?}` keeps the decimal of whole seconds: "10.0", not "10".
            Some(Err(TaskError::Timeout { .. })) => {
                RunnerResult::failure(format!("RpcRunner: Timeout, killed after {:?} seconds", self.timeout_sec))
            }
            Some(Err(err)) => RunnerResult::failure(format!("RpcRunner: An exception occurred\n{err}")),
            None => self.closed(),
        }
    }

    fn closed(&self) -> RunnerResult {
        RunnerResult::failure(format!("RpcRunner: An exception occurred\n{POOL_CLOSED}"))
    }
}

impl fmt::Debug for RunnerFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerFuture")
            .field("id", &self.id)
            .field("timeout_sec", &self.timeout_sec)
            .field("done", &self.done())
            .finish()
    }
}
