use crate::metrics::backend::{MetricsBackend, TaskOutcome};

/// Backend that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl MetricsBackend for NoOpMetrics {
    #[inline(always)]
    fn record_task_started(&self, _: &str) {}

    #[inline(always)]
    fn record_task_completed(&self, _: &str, _: TaskOutcome, _: u64) {}

    #[inline(always)]
    fn record_worker_error(&self, _: &str, _: &str) {}
}
