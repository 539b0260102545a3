use std::{path::Path, sync::Arc};

use tracing::{debug, trace};

use rmeter_model::{ArgInfo, EvaluatorConfig, RpcConfig};

use crate::{
    lifecycle::{AllocArgument, Cleanup, CreateSession, LifecycleError, RunEvaluator, UploadModule},
    remote::{Argument, Connector, RemoteDevice, RemoteError, RemoteModule, RemoteSession, TimingParams},
};

/// Suffix of the shared library the remote loader produces next to an uploaded artifact.
pub const COMPANION_SUFFIX: &str = ".so";

/// Opens sessions through the configured [`Connector`].
#[derive(Clone)]
pub struct DefaultCreateSession {
    connector: Arc<dyn Connector>,
}

impl DefaultCreateSession {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }
}

impl CreateSession for DefaultCreateSession {
    fn create_session(&self, config: &RpcConfig) -> Result<Box<dyn RemoteSession>, LifecycleError> {
        trace!(
            tracker = ?config.tracker_addr(),
            key = ?config.tracker_key,
            priority = config.session_priority,
            "connecting to remote endpoint"
        );
        self.connector
            .connect(config)
            .map_err(|e| LifecycleError::remote("create_session", e))
    }
}

/// Uploads the artifact, then loads it as a module.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUploadModule;

impl UploadModule for DefaultUploadModule {
    fn upload_module(
        &self,
        session: &mut dyn RemoteSession,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<Box<dyn RemoteModule>, LifecycleError> {
        session
            .upload(local_path, remote_path)
            .map_err(|e| LifecycleError::remote("upload", e))?;
        session
            .load_module(remote_path)
            .map_err(|e| LifecycleError::remote("load_module", e))
    }
}

/// Allocates randomly filled tensors for every descriptor.
///
/// Only tensor descriptors are supported. All descriptors are checked before the first
/// allocation, so an unsupported kind never leaves buffers behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAllocArgument;

impl DefaultAllocArgument {
    fn alloc_one(
        session: &mut dyn RemoteSession,
        device: &dyn RemoteDevice,
        info: &ArgInfo,
    ) -> Result<Argument, LifecycleError> {
        match info {
            ArgInfo::Tensor { dtype, shape } => {
                let tensor = device
                    .allocate(shape, dtype)
                    .map_err(|e| LifecycleError::remote("allocate", e))?;
                session.random_fill(&tensor).map_err(|e| match e {
                    RemoteError::MissingFunction(name) => LifecycleError::Other(format!(
                        "remote function '{name}' is not available; \
                         make sure random-fill support is enabled on the remote endpoint"
                    )),
                    other => LifecycleError::remote("random_fill", other),
                })?;
                Ok(Argument::Tensor(tensor))
            }
            ArgInfo::Unsupported { kind, .. } => Err(LifecycleError::UnsupportedArgKind(kind.clone())),
        }
    }
}

impl AllocArgument for DefaultAllocArgument {
    fn alloc_argument(
        &self,
        session: &mut dyn RemoteSession,
        device: &dyn RemoteDevice,
        args_info: &[ArgInfo],
        alloc_repeat: usize,
    ) -> Result<Vec<Vec<Argument>>, LifecycleError> {
        if let Some(ArgInfo::Unsupported { kind, .. }) = args_info
            .iter()
            .find(|info| matches!(info, ArgInfo::Unsupported { .. }))
        {
            return Err(LifecycleError::UnsupportedArgKind(kind.clone()));
        }

        let mut repeated = Vec::with_capacity(alloc_repeat);
        for round in 0..alloc_repeat {
            let args = args_info
                .iter()
                .map(|info| Self::alloc_one(session, device, info))
                .collect::<Result<Vec<_>, _>>()?;
            trace!(round, args = args.len(), "allocated argument set");
            repeated.push(args);
        }
        Ok(repeated)
    }
}

/// Times the module entry point once per argument set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRunEvaluator;

impl RunEvaluator for DefaultRunEvaluator {
    fn run_evaluator(
        &self,
        _session: &mut dyn RemoteSession,
        module: &dyn RemoteModule,
        device: &dyn RemoteDevice,
        config: &EvaluatorConfig,
        repeated_args: &[Vec<Argument>],
    ) -> Result<Vec<f64>, LifecycleError> {
        let params = TimingParams::from(config);
        let entry = module.entry_name().to_string();

        let mut costs = Vec::with_capacity(repeated_args.len() * config.repeat as usize);
        for args in repeated_args {
            device.sync().map_err(|e| LifecycleError::remote("device sync", e))?;
            let samples = module
                .time_invoke(&entry, device, &params, args)
                .map_err(|e| LifecycleError::remote("time_invoke", e))?;
            costs.extend(samples);
        }
        debug!(entry = %entry, samples = costs.len(), "evaluator finished");
        Ok(costs)
    }
}

/// Removes the uploaded artifact and its companion library.
///
/// Skips entirely unless both a session and a remote path exist. Every removal is attempted;
/// the first failure is reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCleanup;

impl Cleanup for DefaultCleanup {
    fn cleanup(
        &self,
        session: Option<&mut dyn RemoteSession>,
        remote_path: Option<&str>,
    ) -> Result<(), LifecycleError> {
        let (Some(session), Some(remote_path)) = (session, remote_path) else {
            return Ok(());
        };

        let companion = format!("{remote_path}{COMPANION_SUFFIX}");
        let mut first_err = None;
        for path in [remote_path, companion.as_str(), ""] {
            if let Err(e) = session.remove(path) {
                trace!(path, error = %e, "remote removal failed");
                if first_err.is_none() {
                    first_err = Some(LifecycleError::remote("cleanup", e));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
