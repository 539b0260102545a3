use thiserror::Error;

use rmeter_model::ModelError;

use crate::pool::PoolError;

/// Errors surfaced synchronously while constructing a runner.
///
/// Measurement failures never show up here: they are reported through
/// [`rmeter_model::RunnerResult`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("lifecycle resolution failed: {0}")]
    Resolve(String),

    #[error("worker sanity check failed: {0}")]
    SanityCheck(String),

    #[error("invalid runner configuration: {0}")]
    InvalidConfig(String),

    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("invalid configuration: {0}")]
    Model(#[from] ModelError),
}
