use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker {slot}: {reason}")]
    Spawn { slot: usize, reason: String },

    #[error("worker {slot} is unusable: {reason}")]
    Broken { slot: usize, reason: String },

    #[error("worker pool is closed")]
    Closed,

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}
