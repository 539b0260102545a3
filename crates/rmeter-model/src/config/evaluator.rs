use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Flag, ModelError, ModelResult};

/// Parameters of the timing harness used on the remote device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvaluatorConfig {
    /// Inner invocations averaged into one timing sample.
    pub number: u32,
    /// Independent timing samples per argument set.
    pub repeat: u32,
    /// Minimum duration of one sample; the harness grows `number` to reach it.
    pub min_repeat_ms: u64,
    /// Flush CPU caches before every sample to measure cold-cache latency.
    pub enable_cpu_cache_flush: Flag,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            number: 3,
            repeat: 1,
            min_repeat_ms: 100,
            enable_cpu_cache_flush: Flag::disabled(),
        }
    }
}

impl EvaluatorConfig {
    /// Reject configurations that would produce no samples.
    pub fn normalized(self) -> ModelResult<Self> {
        if self.number == 0 {
            return Err(ModelError::InvalidEvaluatorConfig("number must be at least 1".into()));
        }
        if self.repeat == 0 {
            return Err(ModelError::InvalidEvaluatorConfig("repeat must be at least 1".into()));
        }
        Ok(self)
    }

    /// Preprocessing mode passed to the timing harness.
    pub fn cache_flush(&self) -> CacheFlush {
        if self.enable_cpu_cache_flush.is_enabled() {
            CacheFlush::CpuNonFirstArg
        } else {
            CacheFlush::None
        }
    }
}

/// Cache preprocessing applied by the remote timing harness before each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFlush {
    None,
    /// Flush the CPU cache lines of every argument except the first (the output).
    CpuNonFirstArg,
}

impl CacheFlush {
    /// Name of the preprocessing function understood by the remote side.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheFlush::None => "",
            CacheFlush::CpuNonFirstArg => "cache_flush_cpu_non_first_arg",
        }
    }
}

impl fmt::Display for CacheFlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
