use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("file transfer failed: {0}")]
    Transfer(String),

    #[error("module load failed: {0}")]
    Load(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("remote function '{0}' is not available")]
    MissingFunction(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
