use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{stage} failed: {source}")]
    Remote {
        stage: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("unsupported argument kind: {0}")]
    UnsupportedArgKind(String),

    #[error("invalid artifact path: {0}")]
    ArtifactPath(String),

    #[error("measurement canceled before {0}")]
    Canceled(&'static str),

    #[error("lifecycle step panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl LifecycleError {
    /// Attach the failing step to a transport error.
    pub fn remote(stage: &'static str, source: RemoteError) -> Self {
        LifecycleError::Remote { stage, source }
    }
}
