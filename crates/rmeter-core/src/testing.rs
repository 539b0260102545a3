//! In-memory remote endpoint used by unit tests.
use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rmeter_model::RpcConfig;

use crate::{
    lifecycle::{Cleanup, CreateSession, DefaultCleanup, LifecycleError},
    remote::{Argument, Connector, RemoteDevice, RemoteError, RemoteModule, RemoteSession, TensorHandle, TimingParams},
};

#[derive(Default)]
struct State {
    sessions: usize,
    uploads: Vec<String>,
    removals: Vec<String>,
    allocations: usize,
    random_fills: usize,
    syncs: usize,
    last_cache_flush: Option<String>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub(crate) struct FakeEndpoint {
    state: Arc<Mutex<State>>,
    no_random_fill: bool,
    failing_remove: Option<String>,
    connect_delay: Option<Duration>,
}

impl FakeEndpoint {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn without_random_fill(mut self) -> Self {
        self.no_random_fill = true;
        self
    }

    pub(crate) fn failing_remove(mut self, path: &str) -> Self {
        self.failing_remove = Some(path.to_string());
        self
    }

    pub(crate) fn slow_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub(crate) fn session(&self) -> FakeSession {
        FakeSession { endpoint: self.clone() }
    }

    pub(crate) fn device(&self) -> FakeDevice {
        FakeDevice { endpoint: self.clone() }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.state.lock().unwrap();
        f(&mut guard)
    }

    pub(crate) fn sessions(&self) -> usize {
        self.with(|s| s.sessions)
    }

    pub(crate) fn uploads(&self) -> Vec<String> {
        self.with(|s| s.uploads.clone())
    }

    pub(crate) fn removals(&self) -> Vec<String> {
        self.with(|s| s.removals.clone())
    }

    pub(crate) fn allocations(&self) -> usize {
        self.with(|s| s.allocations)
    }

    pub(crate) fn random_fills(&self) -> usize {
        self.with(|s| s.random_fills)
    }

    pub(crate) fn syncs(&self) -> usize {
        self.with(|s| s.syncs)
    }

    pub(crate) fn last_cache_flush(&self) -> Option<String> {
        self.with(|s| s.last_cache_flush.clone())
    }
}

impl Connector for FakeEndpoint {
    fn connect(&self, _config: &RpcConfig) -> Result<Box<dyn RemoteSession>, RemoteError> {
        if let Some(delay) = self.connect_delay {
            std::thread::sleep(delay);
        }
        self.with(|s| s.sessions += 1);
        Ok(Box::new(self.session()))
    }
}

pub(crate) struct FakeSession {
    endpoint: FakeEndpoint,
}

impl RemoteSession for FakeSession {
    fn device(&mut self, device_type: &str, _index: u32) -> Result<Box<dyn RemoteDevice>, RemoteError> {
        match device_type {
            "cpu" | "cuda" => Ok(Box::new(self.endpoint.device())),
            other => Err(RemoteError::Device(format!("no such device: {other}"))),
        }
    }

    fn upload(&mut self, _local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        self.endpoint.with(|s| s.uploads.push(remote_path.to_string()));
        Ok(())
    }

    fn load_module(&mut self, _remote_path: &str) -> Result<Box<dyn RemoteModule>, RemoteError> {
        Ok(Box::new(FakeModule::new(&self.endpoint)))
    }

    fn random_fill(&mut self, _tensor: &TensorHandle) -> Result<(), RemoteError> {
        if self.endpoint.no_random_fill {
            return Err(RemoteError::MissingFunction("random_fill".into()));
        }
        self.endpoint.with(|s| s.random_fills += 1);
        Ok(())
    }

    fn remove(&mut self, remote_path: &str) -> Result<(), RemoteError> {
        self.endpoint.with(|s| s.removals.push(remote_path.to_string()));
        if self.endpoint.failing_remove.as_deref() == Some(remote_path) {
            return Err(RemoteError::Transfer(format!("cannot remove {remote_path}")));
        }
        Ok(())
    }
}

pub(crate) struct FakeDevice {
    endpoint: FakeEndpoint,
}

impl RemoteDevice for FakeDevice {
    fn allocate(&self, shape: &[u64], dtype: &str) -> Result<TensorHandle, RemoteError> {
        let id = self.endpoint.with(|s| {
            s.allocations += 1;
            s.next_id += 1;
            s.next_id
        });
        Ok(TensorHandle::new(id, dtype, shape.to_vec()))
    }

    fn sync(&self) -> Result<(), RemoteError> {
        self.endpoint.with(|s| s.syncs += 1);
        Ok(())
    }
}

pub(crate) struct FakeModule {
    endpoint: FakeEndpoint,
}

impl FakeModule {
    pub(crate) fn new(endpoint: &FakeEndpoint) -> Self {
        Self {
            endpoint: endpoint.clone(),
        }
    }
}

impl RemoteModule for FakeModule {
    fn entry_name(&self) -> &str {
        "default_function"
    }

    fn time_invoke(
        &self,
        _entry: &str,
        _device: &dyn RemoteDevice,
        params: &TimingParams,
        _args: &[Argument],
    ) -> Result<Vec<f64>, RemoteError> {
        self.endpoint
            .with(|s| s.last_cache_flush = Some(params.cache_flush.as_str().to_string()));
        Ok((1..=params.repeat).map(|i| f64::from(i) * 1e-3).collect())
    }
}

/// Default cleanup that counts its invocations.
#[derive(Clone, Default)]
pub(crate) struct CountingCleanup {
    calls: Arc<AtomicUsize>,
}

impl CountingCleanup {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Cleanup for CountingCleanup {
    fn cleanup(
        &self,
        session: Option<&mut dyn RemoteSession>,
        remote_path: Option<&str>,
    ) -> Result<(), LifecycleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        DefaultCleanup.cleanup(session, remote_path)
    }
}

/// Session factory that always fails.
pub(crate) struct RefusingCreateSession;

impl CreateSession for RefusingCreateSession {
    fn create_session(&self, _config: &RpcConfig) -> Result<Box<dyn RemoteSession>, LifecycleError> {
        Err(LifecycleError::remote(
            "create_session",
            RemoteError::Connect("connection refused".into()),
        ))
    }
}
