//! Metrics hooks of the worker pool.
//!
//! Backends implement [`MetricsBackend`] and are passed to the runner builder;
//! the default is [`NoOpMetrics`].
mod backend;
pub use backend::{MetricsBackend, MetricsHandle, TaskOutcome};

mod noop;
pub use noop::NoOpMetrics;

use std::sync::Arc;

#[inline]
pub fn noop_metrics() -> MetricsHandle {
    Arc::new(NoOpMetrics)
}
