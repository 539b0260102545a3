//! Worker-side execution of one measurement.
//!
//! [`execute_task`] is what every worker runs, in-process or in a child process:
//! resolve the lifecycle in the local registry, then drive
//! session → upload → allocate → evaluate under a scope guard that always cleans up.
mod error;
pub use error::TaskError;

mod id;
pub use id::make_task_id;

mod scope;
use scope::{RemoteScope, panic_message};

use std::{
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use rmeter_model::{ArgInfo, EvaluatorConfig, RpcConfig};

use crate::{
    lifecycle::{Lifecycle, LifecycleError},
    registry::{LifecycleRefs, LifecycleRegistry},
};

/// Outcome of a worker task: timing samples in seconds, or the reason there are none.
pub type TaskResult = Result<Vec<f64>, TaskError>;

/// Everything a worker needs besides the lifecycle references. Serializable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurePayload {
    pub rpc_config: RpcConfig,
    pub evaluator_config: EvaluatorConfig,
    pub alloc_repeat: usize,
    pub artifact_path: String,
    pub device_type: String,
    pub args_info: Vec<ArgInfo>,
}

/// One measurement request as submitted to the pool.
#[derive(Clone, Debug)]
pub struct MeasureTask {
    pub refs: LifecycleRefs,
    pub payload: MeasurePayload,
}

/// Unit of work executed by a pool worker.
#[derive(Clone, Debug)]
pub enum WorkerTask {
    /// Resolve every lifecycle role and report, without touching the remote side.
    Check(LifecycleRefs),
    /// Run a full measurement.
    Measure(MeasureTask),
}

impl WorkerTask {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerTask::Check(_) => "check",
            WorkerTask::Measure(_) => "measure",
        }
    }
}

/// Execute `task` with implementations resolved from `registry`.
///
/// Never panics: panics inside lifecycle implementations are reported as task errors.
/// `cancel` is observed between lifecycle steps.
pub fn execute_task(task: &WorkerTask, registry: &LifecycleRegistry, cancel: &CancellationToken) -> TaskResult {
    match task {
        WorkerTask::Check(refs) => {
            registry.resolve(refs).map_err(TaskError::resolve)?;
            Ok(Vec::new())
        }
        WorkerTask::Measure(task) => {
            let lifecycle = registry.resolve(&task.refs).map_err(TaskError::resolve)?;
            run_lifecycle(&lifecycle, &task.payload, cancel).map_err(TaskError::lifecycle)
        }
    }
}

/// Drive the measurement steps and release remote resources on every exit path.
///
/// A cleanup failure is logged and never replaces the measurement outcome.
pub fn run_lifecycle(
    lifecycle: &Lifecycle,
    payload: &MeasurePayload,
    cancel: &CancellationToken,
) -> Result<Vec<f64>, LifecycleError> {
    let mut scope = RemoteScope::new(Arc::clone(&lifecycle.cleanup));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| measure(&mut scope, lifecycle, payload, cancel)))
        .unwrap_or_else(|p| Err(LifecycleError::Panicked(panic_message(&*p))));

    match (outcome, scope.release()) {
        (outcome, Ok(())) => outcome,
        (Ok(costs), Err(e)) => {
            warn!(error = %e, artifact = %payload.artifact_path, "cleanup failed after a successful measurement");
            Ok(costs)
        }
        (Err(err), Err(e)) => {
            warn!(error = %e, artifact = %payload.artifact_path, "cleanup failed after a failed measurement");
            Err(err)
        }
    }
}

fn measure(
    scope: &mut RemoteScope,
    lifecycle: &Lifecycle,
    payload: &MeasurePayload,
    cancel: &CancellationToken,
) -> Result<Vec<f64>, LifecycleError> {
    let remote_path = remote_file_name(&payload.artifact_path)?;
    debug!(
        artifact = %payload.artifact_path,
        device = %payload.device_type,
        args = payload.args_info.len(),
        alloc_repeat = payload.alloc_repeat,
        "measurement started"
    );

    checkpoint(cancel, "create_session")?;
    let session = lifecycle.create_session.create_session(&payload.rpc_config)?;
    let session = scope.session.insert(session);
    let device = session
        .device(&payload.device_type, 0)
        .map_err(|e| LifecycleError::remote("device lookup", e))?;
    trace!(device = %payload.device_type, "session open");

    checkpoint(cancel, "upload_module")?;
    scope.remote_path = Some(remote_path.clone());
    let module = lifecycle.upload_module.upload_module(
        &mut **session,
        Path::new(&payload.artifact_path),
        &remote_path,
    )?;
    trace!(remote_path = %remote_path, "module loaded");

    checkpoint(cancel, "alloc_argument")?;
    let repeated_args = lifecycle.alloc_argument.alloc_argument(
        &mut **session,
        &*device,
        &payload.args_info,
        payload.alloc_repeat,
    )?;

    checkpoint(cancel, "run_evaluator")?;
    let costs = lifecycle.run_evaluator.run_evaluator(
        &mut **session,
        &*module,
        &*device,
        &payload.evaluator_config,
        &repeated_args,
    )?;
    debug!(samples = costs.len(), "measurement finished");
    Ok(costs)
}

fn checkpoint(cancel: &CancellationToken, next: &'static str) -> Result<(), LifecycleError> {
    if cancel.is_cancelled() {
        return Err(LifecycleError::Canceled(next));
    }
    Ok(())
}

/// Remote name of an artifact: its base file name.
fn remote_file_name(artifact_path: &str) -> Result<String, LifecycleError> {
    Path::new(artifact_path)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| LifecycleError::ArtifactPath(artifact_path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lifecycle::{AllocArgument, RunEvaluator, UploadModule},
        registry::FunctionRef,
        remote::{Argument, RemoteDevice, RemoteModule, RemoteSession},
        testing::{CountingCleanup, FakeEndpoint, RefusingCreateSession},
    };
    use rmeter_model::Flag;

    struct FailingUpload;

    impl UploadModule for FailingUpload {
        fn upload_module(
            &self,
            _session: &mut dyn RemoteSession,
            _local_path: &Path,
            _remote_path: &str,
        ) -> Result<Box<dyn RemoteModule>, LifecycleError> {
            Err(LifecycleError::Other("disk full".into()))
        }
    }

    struct PanickingEvaluator;

    impl RunEvaluator for PanickingEvaluator {
        fn run_evaluator(
            &self,
            _session: &mut dyn RemoteSession,
            _module: &dyn RemoteModule,
            _device: &dyn RemoteDevice,
            _config: &EvaluatorConfig,
            _repeated_args: &[Vec<Argument>],
        ) -> Result<Vec<f64>, LifecycleError> {
            panic!("driver fault")
        }
    }

    struct CancelDuringAlloc(CancellationToken);

    impl AllocArgument for CancelDuringAlloc {
        fn alloc_argument(
            &self,
            _session: &mut dyn RemoteSession,
            _device: &dyn RemoteDevice,
            _args_info: &[ArgInfo],
            _alloc_repeat: usize,
        ) -> Result<Vec<Vec<Argument>>, LifecycleError> {
            self.0.cancel();
            Ok(Vec::new())
        }
    }

    fn payload(alloc_repeat: usize, repeat: u32) -> MeasurePayload {
        MeasurePayload {
            rpc_config: RpcConfig::default(),
            evaluator_config: EvaluatorConfig {
                number: 1,
                repeat,
                min_repeat_ms: 0,
                enable_cpu_cache_flush: Flag::disabled(),
            },
            alloc_repeat,
            artifact_path: "/tmp/build/mm.so".into(),
            device_type: "cpu".into(),
            args_info: vec![ArgInfo::tensor("float32", vec![128, 128])],
        }
    }

    fn setup() -> (FakeEndpoint, CountingCleanup, LifecycleRegistry) {
        let endpoint = FakeEndpoint::new();
        let cleanup = CountingCleanup::default();
        let mut registry = LifecycleRegistry::new(Arc::new(endpoint.clone()));
        registry.register_cleanup("counting", Arc::new(cleanup.clone())).unwrap();
        (endpoint, cleanup, registry)
    }

    fn refs() -> LifecycleRefs {
        LifecycleRefs {
            cleanup: FunctionRef::named("counting"),
            ..Default::default()
        }
    }

    fn run(registry: &LifecycleRegistry, refs: LifecycleRefs, payload: MeasurePayload) -> TaskResult {
        let task = WorkerTask::Measure(MeasureTask { refs, payload });
        execute_task(&task, registry, &CancellationToken::new())
    }

    #[test]
    fn produces_alloc_repeat_times_repeat_samples() {
        let (endpoint, cleanup, registry) = setup();

        let costs = run(&registry, refs(), payload(2, 3)).unwrap();

        assert_eq!(costs.len(), 6);
        assert!(costs.iter().all(|c| *c >= 0.0));
        assert_eq!(endpoint.uploads(), vec!["mm.so".to_string()]);
        assert_eq!(cleanup.calls(), 1);
        assert_eq!(endpoint.removals()[..2], ["mm.so".to_string(), "mm.so.so".to_string()]);
    }

    #[test]
    fn cleanup_runs_once_when_session_fails() {
        let (endpoint, cleanup, registry) = setup();
        let refs = LifecycleRefs {
            create_session: FunctionRef::Direct(Arc::new(RefusingCreateSession)),
            ..refs()
        };

        let err = run(&registry, refs, payload(1, 1)).unwrap_err();

        assert!(err.to_string().contains("connection refused"), "got: {err}");
        assert_eq!(cleanup.calls(), 1);
        assert!(endpoint.removals().is_empty(), "no session, nothing to remove");
    }

    #[test]
    fn cleanup_runs_once_when_upload_fails() {
        let (endpoint, cleanup, registry) = setup();
        let refs = LifecycleRefs {
            upload_module: FunctionRef::Direct(Arc::new(FailingUpload)),
            ..refs()
        };

        let err = run(&registry, refs, payload(1, 1)).unwrap_err();

        assert_eq!(err, TaskError::lifecycle("disk full"));
        assert_eq!(cleanup.calls(), 1);
        assert_eq!(endpoint.removals().first().map(String::as_str), Some("mm.so"));
    }

    #[test]
    fn cleanup_runs_once_when_alloc_rejects_kind() {
        let (endpoint, cleanup, registry) = setup();
        let mut payload = payload(2, 1);
        payload.args_info.push(ArgInfo::Unsupported {
            kind: "OPAQUE".into(),
            fields: Vec::new(),
        });

        let err = run(&registry, refs(), payload).unwrap_err();

        assert!(err.to_string().contains("unsupported argument kind: OPAQUE"), "got: {err}");
        assert_eq!(endpoint.allocations(), 0);
        assert_eq!(cleanup.calls(), 1);
    }

    #[test]
    fn panicking_evaluator_becomes_error_and_still_cleans_up() {
        let (_endpoint, cleanup, registry) = setup();
        let refs = LifecycleRefs {
            run_evaluator: FunctionRef::Direct(Arc::new(PanickingEvaluator)),
            ..refs()
        };

        let err = run(&registry, refs, payload(1, 1)).unwrap_err();

        assert!(err.to_string().contains("driver fault"), "got: {err}");
        assert_eq!(cleanup.calls(), 1);
    }

    #[test]
    fn cancellation_stops_at_next_step_and_cleans_up() {
        let (endpoint, cleanup, registry) = setup();
        let cancel = CancellationToken::new();
        let refs = LifecycleRefs {
            alloc_argument: FunctionRef::Direct(Arc::new(CancelDuringAlloc(cancel.clone()))),
            ..refs()
        };
        let task = WorkerTask::Measure(MeasureTask {
            refs,
            payload: payload(1, 1),
        });

        let err = execute_task(&task, &registry, &cancel).unwrap_err();

        assert!(err.to_string().contains("canceled before run_evaluator"), "got: {err}");
        assert_eq!(cleanup.calls(), 1);
        assert_eq!(endpoint.syncs(), 0);
    }

    #[test]
    fn cleanup_failure_does_not_mask_success() {
        let endpoint = FakeEndpoint::new().failing_remove("mm.so");
        let registry = LifecycleRegistry::new(Arc::new(endpoint.clone()));

        let costs = run(&registry, LifecycleRefs::default(), payload(1, 2)).unwrap();

        assert_eq!(costs.len(), 2);
        assert_eq!(endpoint.removals().len(), 3);
    }

    #[test]
    fn unknown_device_is_reported() {
        let (_endpoint, cleanup, registry) = setup();
        let mut payload = payload(1, 1);
        payload.device_type = "hexagon".into();

        let err = run(&registry, refs(), payload).unwrap_err();

        assert!(err.to_string().contains("device lookup failed"), "got: {err}");
        assert_eq!(cleanup.calls(), 1);
    }

    #[test]
    fn check_resolves_without_connecting() {
        let (endpoint, _cleanup, registry) = setup();

        let ok = execute_task(&WorkerTask::Check(refs()), &registry, &CancellationToken::new());
        assert_eq!(ok, Ok(Vec::new()));
        assert_eq!(endpoint.sessions(), 0);

        let missing = LifecycleRefs {
            alloc_argument: FunctionRef::named("does_not_exist"),
            ..Default::default()
        };
        let err = execute_task(&WorkerTask::Check(missing), &registry, &CancellationToken::new());
        assert!(matches!(err, Err(TaskError::Resolve { .. })));
    }

    #[test]
    fn artifact_without_file_name_is_rejected() {
        assert!(remote_file_name("/tmp/build/").is_ok_and(|n| n == "build"));
        assert!(remote_file_name("..").is_err());
        assert_eq!(remote_file_name("kernels/mm.so").unwrap(), "mm.so");
    }
}
