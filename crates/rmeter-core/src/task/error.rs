use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a worker task did not produce timings.
///
/// Carries messages rather than source errors so that it can travel over the worker
/// process protocol unchanged.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TaskError {
    #[error("task exceeded its {secs} second budget")]
    Timeout { secs: f64 },

    #[error("{message}")]
    Resolve { message: String },

    #[error("{message}")]
    Lifecycle { message: String },

    #[error("worker failure: {message}")]
    Worker { message: String },
}

impl TaskError {
    pub fn resolve(message: impl ToString) -> Self {
        TaskError::Resolve {
            message: message.to_string(),
        }
    }

    pub fn lifecycle(message: impl ToString) -> Self {
        TaskError::Lifecycle {
            message: message.to_string(),
        }
    }

    pub fn worker(message: impl ToString) -> Self {
        TaskError::Worker {
            message: message.to_string(),
        }
    }
}
