//! Capability surface of a remote execution endpoint.
//!
//! The transport (connection handshake, wire serialization, tracker protocol) lives behind
//! these traits. The core only drives the calls below, always from a single worker thread,
//! so sessions, devices and modules are not required to be `Send`.
mod error;
pub use error::RemoteError;

mod handle;
pub use handle::{Argument, TensorHandle, TimingParams};

pub mod sim;

use std::path::Path;

use rmeter_model::RpcConfig;

/// Opens sessions to a remote endpoint.
///
/// Shared by every worker of a pool, hence `Send + Sync`.
pub trait Connector: Send + Sync {
    /// Open a new session according to `config` (tracker address, key, priority, retries).
    fn connect(&self, config: &RpcConfig) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// Live connection to one endpoint, owned by exactly one measurement task.
pub trait RemoteSession {
    /// Device handle of the given kind and index on the remote side.
    fn device(&mut self, device_type: &str, index: u32) -> Result<Box<dyn RemoteDevice>, RemoteError>;

    /// Copy a local file to `remote_path` in the session's workspace.
    fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError>;

    /// Load a previously uploaded artifact as an executable module.
    fn load_module(&mut self, remote_path: &str) -> Result<Box<dyn RemoteModule>, RemoteError>;

    /// Fill a device tensor with random data.
    ///
    /// Endpoints built without random-fill support report [`RemoteError::MissingFunction`].
    fn random_fill(&mut self, tensor: &TensorHandle) -> Result<(), RemoteError>;

    /// Remove a file from the session's workspace.
    fn remove(&mut self, remote_path: &str) -> Result<(), RemoteError>;
}

/// Device on the remote side.
pub trait RemoteDevice {
    /// Allocate an uninitialized tensor.
    fn allocate(&self, shape: &[u64], dtype: &str) -> Result<TensorHandle, RemoteError>;

    /// Block until all queued work on the device has finished.
    fn sync(&self) -> Result<(), RemoteError>;
}

/// Executable module loaded on the remote side.
pub trait RemoteModule {
    /// Name of the function to benchmark.
    fn entry_name(&self) -> &str;

    /// Time `entry` with the harness described by `params`.
    ///
    /// Returns one value in seconds per `params.repeat`.
    fn time_invoke(
        &self,
        entry: &str,
        device: &dyn RemoteDevice,
        params: &TimingParams,
        args: &[Argument],
    ) -> Result<Vec<f64>, RemoteError>;
}
