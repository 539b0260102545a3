use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ArgInfo;

/// One measurement request.
///
/// Created by the caller for every candidate artifact and consumed once by a runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerInput {
    /// Path of the compiled artifact on the local filesystem.
    pub artifact_path: PathBuf,
    /// Device kind to run on (e.g. `"cpu"`, `"cuda"`).
    pub device_type: String,
    /// Ordered descriptors of the entry point arguments.
    #[serde(default)]
    pub args_info: Vec<ArgInfo>,
}

impl RunnerInput {
    pub fn new(
        artifact_path: impl Into<PathBuf>,
        device_type: impl Into<String>,
        args_info: Vec<ArgInfo>,
    ) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            device_type: device_type.into(),
            args_info,
        }
    }
}
