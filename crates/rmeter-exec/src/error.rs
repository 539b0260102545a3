use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid worker configuration: {0}")]
    InvalidConfig(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("worker process exited: {0}")]
    Exited(String),

    #[error("worker did not report ready within {0:?}")]
    StartupTimeout(std::time::Duration),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
