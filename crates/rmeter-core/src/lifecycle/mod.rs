//! The five overridable steps of one measurement.
//!
//! Each role is a trait so that custom remote interaction can be plugged in either as a
//! direct implementation (in-process workers) or by name through a
//! [`LifecycleRegistry`](crate::registry::LifecycleRegistry) that every worker owns.
mod error;
pub use error::LifecycleError;

mod defaults;
pub use defaults::{
    COMPANION_SUFFIX, DefaultAllocArgument, DefaultCleanup, DefaultCreateSession, DefaultRunEvaluator,
    DefaultUploadModule,
};

use std::{fmt, path::Path, sync::Arc};

use rmeter_model::{ArgInfo, EvaluatorConfig, RpcConfig};

use crate::remote::{Argument, RemoteDevice, RemoteModule, RemoteSession};

/// Opens the session used by one measurement.
pub trait CreateSession: Send + Sync {
    fn create_session(&self, config: &RpcConfig) -> Result<Box<dyn RemoteSession>, LifecycleError>;
}

/// Transfers the artifact and loads it on the remote side.
pub trait UploadModule: Send + Sync {
    fn upload_module(
        &self,
        session: &mut dyn RemoteSession,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<Box<dyn RemoteModule>, LifecycleError>;
}

/// Builds `alloc_repeat` independent argument lists.
pub trait AllocArgument: Send + Sync {
    fn alloc_argument(
        &self,
        session: &mut dyn RemoteSession,
        device: &dyn RemoteDevice,
        args_info: &[ArgInfo],
        alloc_repeat: usize,
    ) -> Result<Vec<Vec<Argument>>, LifecycleError>;
}

/// Times the module once per argument list and flattens the samples.
pub trait RunEvaluator: Send + Sync {
    fn run_evaluator(
        &self,
        session: &mut dyn RemoteSession,
        module: &dyn RemoteModule,
        device: &dyn RemoteDevice,
        config: &EvaluatorConfig,
        repeated_args: &[Vec<Argument>],
    ) -> Result<Vec<f64>, LifecycleError>;
}

/// Releases whatever the earlier steps left on the remote side.
///
/// Called exactly once per task, with `None` for anything that was never established.
pub trait Cleanup: Send + Sync {
    fn cleanup(
        &self,
        session: Option<&mut dyn RemoteSession>,
        remote_path: Option<&str>,
    ) -> Result<(), LifecycleError>;
}

/// Identifies one of the five lifecycle roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    CreateSession,
    UploadModule,
    AllocArgument,
    RunEvaluator,
    Cleanup,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::CreateSession,
        Role::UploadModule,
        Role::AllocArgument,
        Role::RunEvaluator,
        Role::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::CreateSession => "create_session",
            Role::UploadModule => "upload_module",
            Role::AllocArgument => "alloc_argument",
            Role::RunEvaluator => "run_evaluator",
            Role::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved set of lifecycle implementations for one task.
#[derive(Clone)]
pub struct Lifecycle {
    pub create_session: Arc<dyn CreateSession>,
    pub upload_module: Arc<dyn UploadModule>,
    pub alloc_argument: Arc<dyn AllocArgument>,
    pub run_evaluator: Arc<dyn RunEvaluator>,
    pub cleanup: Arc<dyn Cleanup>,
}

impl Lifecycle {
    /// Default implementations talking to endpoints opened by `connector`.
    pub fn defaults(connector: Arc<dyn crate::remote::Connector>) -> Self {
        Self {
            create_session: Arc::new(DefaultCreateSession::new(connector)),
            upload_module: Arc::new(DefaultUploadModule),
            alloc_argument: Arc::new(DefaultAllocArgument),
            run_evaluator: Arc::new(DefaultRunEvaluator),
            cleanup: Arc::new(DefaultCleanup),
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle").finish_non_exhaustive()
    }
}
