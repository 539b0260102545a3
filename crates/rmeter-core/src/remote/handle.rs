use rmeter_model::{CacheFlush, EvaluatorConfig};

/// Reference to a tensor living on the remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorHandle {
    id: u64,
    dtype: String,
    shape: Vec<u64>,
}

impl TensorHandle {
    pub fn new(id: u64, dtype: impl Into<String>, shape: impl Into<Vec<u64>>) -> Self {
        Self {
            id,
            dtype: dtype.into(),
            shape: shape.into(),
        }
    }

    /// Transport-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dtype(&self) -> &str {
        &self.dtype
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Number of elements; a scalar has one.
    pub fn numel(&self) -> u64 {
        self.shape.iter().product()
    }
}

/// One runtime argument passed to the measured entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Tensor(TensorHandle),
}

/// Settings of the remote timing harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingParams {
    pub number: u32,
    pub repeat: u32,
    pub min_repeat_ms: u64,
    pub cache_flush: CacheFlush,
}

impl From<&EvaluatorConfig> for TimingParams {
    fn from(cfg: &EvaluatorConfig) -> Self {
        Self {
            number: cfg.number,
            repeat: cfg.repeat,
            min_repeat_ms: cfg.min_repeat_ms,
            cache_flush: cfg.cache_flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmeter_model::Flag;

    #[test]
    fn numel_of_scalar_is_one() {
        assert_eq!(TensorHandle::new(1, "float32", Vec::new()).numel(), 1);
        assert_eq!(TensorHandle::new(2, "float32", vec![4, 8]).numel(), 32);
    }

    #[test]
    fn timing_params_follow_evaluator_config() {
        let cfg = EvaluatorConfig {
            number: 2,
            repeat: 7,
            min_repeat_ms: 0,
            enable_cpu_cache_flush: Flag::enabled(),
        };
        let params = TimingParams::from(&cfg);

        assert_eq!((params.number, params.repeat, params.min_repeat_ms), (2, 7, 0));
        assert_eq!(params.cache_flush, CacheFlush::CpuNonFirstArg);
    }
}
