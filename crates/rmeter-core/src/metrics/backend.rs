use std::sync::Arc;

use crate::task::{TaskError, TaskResult};

/// How a measurement left the pool, for metrics classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Timings were produced.
    Success,
    /// A lifecycle step, the resolver or the worker failed.
    Failure,
    /// The per-task budget ran out.
    Timeout,
}

impl TaskOutcome {
    /// Classify a finished task.
    pub fn of(result: &TaskResult) -> Self {
        match result {
            Ok(_) => TaskOutcome::Success,
            Err(TaskError::Timeout { .. }) => TaskOutcome::Timeout,
            Err(_) => TaskOutcome::Failure,
        }
    }

    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::Failure => "failure",
            TaskOutcome::Timeout => "timeout",
        }
    }
}

/// Sink for worker pool metrics.
///
/// Every call is labelled with the worker factory kind (`"local"`, `"process"`).
/// Implementations must be cheap: they are called on the pool's hot path.
pub trait MetricsBackend: Send + Sync + 'static {
    /// A task was handed to a worker.
    fn record_task_started(&self, pool: &str);
    /// A task finished, timed out or failed; `duration_ms` is measured from hand-off.
    fn record_task_completed(&self, pool: &str, outcome: TaskOutcome, duration_ms: u64);
    /// A worker could not be spawned, crashed or had to be killed.
    fn record_worker_error(&self, pool: &str, kind: &str);
}

/// Shared handle to a metrics backend.
pub type MetricsHandle = Arc<dyn MetricsBackend>;
