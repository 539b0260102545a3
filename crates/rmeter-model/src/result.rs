use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Terminal outcome of one measurement.
///
/// Holds either the timing samples or an error message, never both.
/// Fields are private so the invariant cannot be broken after construction;
/// deserialization rejects documents with both sides or neither.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawRunnerResult")]
pub struct RunnerResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    run_secs: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_msg: Option<String>,
}

impl RunnerResult {
    /// Successful measurement, one entry per timing sample, in seconds.
    pub fn success(run_secs: Vec<f64>) -> Self {
        Self {
            run_secs: Some(run_secs),
            error_msg: None,
        }
    }

    /// Failed measurement with a human-readable reason.
    pub fn failure(error_msg: impl Into<String>) -> Self {
        Self {
            run_secs: None,
            error_msg: Some(error_msg.into()),
        }
    }

    pub fn run_secs(&self) -> Option<&[f64]> {
        self.run_secs.as_deref()
    }

    pub fn error_msg(&self) -> Option<&str> {
        self.error_msg.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.run_secs.is_some()
    }

    /// Mean of the timing samples, `None` for failures or empty results.
    pub fn mean_secs(&self) -> Option<f64> {
        let secs = self.run_secs.as_deref()?;
        if secs.is_empty() {
            return None;
        }
        Some(secs.iter().sum::<f64>() / secs.len() as f64)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRunnerResult {
    #[serde(default)]
    run_secs: Option<Vec<f64>>,
    #[serde(default)]
    error_msg: Option<String>,
}

impl TryFrom<RawRunnerResult> for RunnerResult {
    type Error = ModelError;

    fn try_from(raw: RawRunnerResult) -> Result<Self, Self::Error> {
        match (raw.run_secs, raw.error_msg) {
            (Some(secs), None) => Ok(Self::success(secs)),
            (None, Some(msg)) => Ok(Self::failure(msg)),
            (Some(_), Some(_)) => Err(ModelError::InvalidResult(
                "both runSecs and errorMsg are set".into(),
            )),
            (None, None) => Err(ModelError::InvalidResult(
                "one of runSecs or errorMsg is required".into(),
            )),
        }
    }
}

impl fmt::Display for RunnerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.run_secs, &self.error_msg) {
            (Some(secs), _) => write!(f, "RunnerResult(run_secs={secs:?})"),
            (None, msg) => write!(f, "RunnerResult(error_msg={:?})", msg.as_deref().unwrap_or_default()),
        }
    }
}
