//! Simulated endpoint.
//!
//! Runs nothing: timings are derived from argument sizes. Useful for demos, smoke tests of a
//! deployment and for exercising worker plumbing without a device.
use std::{
    collections::HashSet,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tracing::trace;

use rmeter_model::{CacheFlush, RpcConfig};

use crate::remote::{
    Argument, Connector, RemoteDevice, RemoteError, RemoteModule, RemoteSession, TensorHandle, TimingParams,
};

/// Entry point name reported by simulated modules.
pub const SIM_ENTRY: &str = "default_function";

/// Connector to a simulated endpoint.
#[derive(Debug, Clone)]
pub struct SimConnector {
    devices: Vec<String>,
    overhead_secs: f64,
    secs_per_element: f64,
    connect_delay: Duration,
}

impl Default for SimConnector {
    fn default() -> Self {
        Self {
            devices: vec!["cpu".into()],
            overhead_secs: 1e-5,
            secs_per_element: 1e-9,
            connect_delay: Duration::ZERO,
        }
    }
}

impl SimConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device kinds the endpoint exposes. Defaults to `["cpu"]`.
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Fixed cost of one invocation plus a cost per argument element.
    pub fn with_cost(mut self, overhead_secs: f64, secs_per_element: f64) -> Self {
        self.overhead_secs = overhead_secs;
        self.secs_per_element = secs_per_element;
        self
    }

    /// Block every `connect` for `delay`, as a congested tracker would.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }
}

impl Connector for SimConnector {
    fn connect(&self, config: &RpcConfig) -> Result<Box<dyn RemoteSession>, RemoteError> {
        if !self.connect_delay.is_zero() {
            std::thread::sleep(self.connect_delay);
        }
        trace!(key = ?config.tracker_key, "simulated session opened");
        Ok(Box::new(SimSession {
            endpoint: self.clone(),
            files: HashSet::new(),
            next_tensor: AtomicU64::new(1),
        }))
    }
}

struct SimSession {
    endpoint: SimConnector,
    files: HashSet<String>,
    next_tensor: AtomicU64,
}

impl RemoteSession for SimSession {
    fn device(&mut self, device_type: &str, index: u32) -> Result<Box<dyn RemoteDevice>, RemoteError> {
        if index != 0 || !self.endpoint.devices.iter().any(|d| d == device_type) {
            return Err(RemoteError::Device(format!("{device_type}({index}) is not available")));
        }
        Ok(Box::new(SimDevice {
            next_tensor: self.next_tensor.fetch_add(1 << 32, Ordering::Relaxed),
            allocated: AtomicU64::new(0),
        }))
    }

    fn upload(&mut self, _local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        self.files.insert(remote_path.to_string());
        Ok(())
    }

    fn load_module(&mut self, remote_path: &str) -> Result<Box<dyn RemoteModule>, RemoteError> {
        if !self.files.contains(remote_path) {
            return Err(RemoteError::Load(format!("{remote_path} was not uploaded")));
        }
        Ok(Box::new(SimModule {
            overhead_secs: self.endpoint.overhead_secs,
            secs_per_element: self.endpoint.secs_per_element,
        }))
    }

    fn random_fill(&mut self, _tensor: &TensorHandle) -> Result<(), RemoteError> {
        Ok(())
    }

    fn remove(&mut self, remote_path: &str) -> Result<(), RemoteError> {
        if remote_path.is_empty() {
            self.files.clear();
        } else {
            self.files.remove(remote_path);
        }
        Ok(())
    }
}

struct SimDevice {
    next_tensor: u64,
    allocated: AtomicU64,
}

impl RemoteDevice for SimDevice {
    fn allocate(&self, shape: &[u64], dtype: &str) -> Result<TensorHandle, RemoteError> {
        let n = self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(TensorHandle::new(self.next_tensor + n, dtype, shape.to_vec()))
    }

    fn sync(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

struct SimModule {
    overhead_secs: f64,
    secs_per_element: f64,
}

impl RemoteModule for SimModule {
    fn entry_name(&self) -> &str {
        SIM_ENTRY
    }

    fn time_invoke(
        &self,
        entry: &str,
        _device: &dyn RemoteDevice,
        params: &TimingParams,
        args: &[Argument],
    ) -> Result<Vec<f64>, RemoteError> {
        if entry != SIM_ENTRY {
            return Err(RemoteError::MissingFunction(entry.to_string()));
        }
        let elements: u64 = args
            .iter()
            .map(|arg| match arg {
                Argument::Tensor(t) => t.numel(),
            })
            .sum();
        let mut base = self.overhead_secs + elements as f64 * self.secs_per_element;
        if params.cache_flush == CacheFlush::CpuNonFirstArg {
            base *= 1.1;
        }
        Ok((0..params.repeat)
            .map(|i| base * (1.0 + 0.01 * f64::from(i % 3)))
            .collect())
    }
}
