pub mod error;
pub mod future;
pub mod lifecycle;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod remote;
pub mod runner;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use error::CoreError;
pub use future::RunnerFuture;
pub use lifecycle::{AllocArgument, Cleanup, CreateSession, Lifecycle, LifecycleError, Role, RunEvaluator, UploadModule};
pub use metrics::{MetricsBackend, MetricsHandle, NoOpMetrics, TaskOutcome, noop_metrics};
pub use pool::{Completion, Initializer, LocalWorkers, PoolError, Worker, WorkerContext, WorkerFactory, WorkerPool};
pub use registry::{FunctionRef, LifecycleNames, LifecycleRefs, LifecycleRegistry, ResolveError};
pub use remote::{Argument, Connector, RemoteDevice, RemoteError, RemoteModule, RemoteSession, TensorHandle, TimingParams};
pub use runner::{RpcRunner, RpcRunnerBuilder, Runner};
pub use task::{MeasurePayload, MeasureTask, TaskError, TaskResult, WorkerTask, execute_task};

pub mod prelude {
    pub use crate::error::CoreError;
    pub use crate::future::RunnerFuture;
    pub use crate::pool::LocalWorkers;
    pub use crate::registry::{FunctionRef, LifecycleRegistry};
    pub use crate::runner::{RpcRunner, Runner};
}
