use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid argument info: {0}")]
    InvalidArgInfo(String),

    #[error("invalid rpc config: {0}")]
    InvalidRpcConfig(String),

    #[error("invalid evaluator config: {0}")]
    InvalidEvaluatorConfig(String),

    #[error("invalid runner result: {0}")]
    InvalidResult(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
