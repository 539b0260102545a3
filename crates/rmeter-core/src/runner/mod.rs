//! The measurement orchestrator.
//!
//! [`RpcRunner`] turns [`RunnerInput`]s into worker tasks, submits them to a [`WorkerPool`]
//! and hands back one [`RunnerFuture`] per input.
use std::{fmt, sync::Arc, time::Duration};

use tracing::{debug, info, instrument};

use rmeter_model::{EvaluatorConfig, RpcConfig, RunnerInput};

use crate::{
    error::CoreError,
    future::RunnerFuture,
    lifecycle::{AllocArgument, Cleanup, CreateSession, RunEvaluator, UploadModule},
    metrics::{MetricsHandle, noop_metrics},
    pool::{WorkerFactory, WorkerPool},
    registry::{FunctionRef, LifecycleRefs},
    task::{MeasurePayload, MeasureTask, TaskError, WorkerTask, make_task_id},
};

/// Budget of the construction-time check task, which never touches the remote side.
const SANITY_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that turns measurement requests into futures.
pub trait Runner: Send + Sync {
    /// Submit every input; the returned futures follow the input order.
    fn run(&self, inputs: &[RunnerInput]) -> Vec<RunnerFuture>;
}

/// Configures and starts an [`RpcRunner`].
pub struct RpcRunnerBuilder {
    factory: Arc<dyn WorkerFactory>,
    rpc_config: RpcConfig,
    evaluator_config: EvaluatorConfig,
    cooldown_sec: f64,
    alloc_repeat: usize,
    refs: LifecycleRefs,
    max_workers: usize,
    metrics: MetricsHandle,
}

impl RpcRunnerBuilder {
    pub fn rpc_config(mut self, config: RpcConfig) -> Self {
        self.rpc_config = config;
        self
    }

    pub fn evaluator_config(mut self, config: EvaluatorConfig) -> Self {
        self.evaluator_config = config;
        self
    }

    /// Pause between measurements. Recorded for callers; the runner does not wait.
    pub fn cooldown_sec(mut self, secs: f64) -> Self {
        self.cooldown_sec = secs;
        self
    }

    /// Independent argument sets allocated per measurement. Must be at least 1.
    pub fn alloc_repeat(mut self, n: usize) -> Self {
        self.alloc_repeat = n;
        self
    }

    pub fn create_session(mut self, f: FunctionRef<dyn CreateSession>) -> Self {
        self.refs.create_session = f;
        self
    }

    pub fn upload_module(mut self, f: FunctionRef<dyn UploadModule>) -> Self {
        self.refs.upload_module = f;
        self
    }

    pub fn alloc_argument(mut self, f: FunctionRef<dyn AllocArgument>) -> Self {
        self.refs.alloc_argument = f;
        self
    }

    pub fn run_evaluator(mut self, f: FunctionRef<dyn RunEvaluator>) -> Self {
        self.refs.run_evaluator = f;
        self
    }

    pub fn cleanup(mut self, f: FunctionRef<dyn Cleanup>) -> Self {
        self.refs.cleanup = f;
        self
    }

    /// Replace all five lifecycle references at once.
    pub fn lifecycle(mut self, refs: LifecycleRefs) -> Self {
        self.refs = refs;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    pub fn metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Normalize the configs, start the pool and verify that a worker can resolve
    /// every lifecycle reference.
    #[instrument(level = "debug", skip(self), fields(kind = self.factory.kind(), max_workers = self.max_workers))]
    pub async fn build(self) -> Result<RpcRunner, CoreError> {
        let rpc_config = self.rpc_config.normalized()?;
        let evaluator_config = self.evaluator_config.normalized()?;
        if self.alloc_repeat == 0 {
            return Err(CoreError::InvalidConfig("alloc_repeat must be at least 1".into()));
        }

        let pool = WorkerPool::start(self.factory, self.max_workers, self.metrics).await?;

        let check = WorkerTask::Check(self.refs.clone());
        let outcome = pool.run(make_task_id("check"), check, SANITY_CHECK_TIMEOUT).await;
        let failure = match outcome {
            Ok(Ok(_)) => None,
            Ok(Err(TaskError::Resolve { message })) => Some(CoreError::Resolve(message)),
            Ok(Err(other)) => Some(CoreError::SanityCheck(other.to_string())),
            Err(e) => Some(CoreError::Pool(e)),
        };
        if let Some(err) = failure {
            pool.shutdown().await;
            return Err(err);
        }

        info!(
            kind = pool.kind(),
            timeout_sec = rpc_config.session_timeout_sec,
            alloc_repeat = self.alloc_repeat,
            "rpc runner ready"
        );
        Ok(RpcRunner {
            rpc_config,
            evaluator_config,
            cooldown_sec: self.cooldown_sec,
            alloc_repeat: self.alloc_repeat,
            refs: self.refs,
            pool,
        })
    }
}

/// Measures artifacts on remote endpoints through a pool of workers.
pub struct RpcRunner {
    rpc_config: RpcConfig,
    evaluator_config: EvaluatorConfig,
    cooldown_sec: f64,
    alloc_repeat: usize,
    refs: LifecycleRefs,
    pool: WorkerPool,
}

impl RpcRunner {
    /// Builder with default configs, one worker and default lifecycle implementations.
    pub fn builder(factory: Arc<dyn WorkerFactory>) -> RpcRunnerBuilder {
        RpcRunnerBuilder {
            factory,
            rpc_config: RpcConfig::default(),
            evaluator_config: EvaluatorConfig::default(),
            cooldown_sec: 0.0,
            alloc_repeat: 1,
            refs: LifecycleRefs::default(),
            max_workers: 1,
            metrics: noop_metrics(),
        }
    }

    pub fn rpc_config(&self) -> &RpcConfig {
        &self.rpc_config
    }

    pub fn evaluator_config(&self) -> &EvaluatorConfig {
        &self.evaluator_config
    }

    pub fn cooldown_sec(&self) -> f64 {
        self.cooldown_sec
    }

    pub fn alloc_repeat(&self) -> usize {
        self.alloc_repeat
    }

    pub fn lifecycle(&self) -> &LifecycleRefs {
        &self.refs
    }

    fn task_for(&self, input: &RunnerInput) -> WorkerTask {
        WorkerTask::Measure(MeasureTask {
            refs: self.refs.clone(),
            payload: MeasurePayload {
                rpc_config: self.rpc_config.clone(),
                evaluator_config: self.evaluator_config.clone(),
                alloc_repeat: self.alloc_repeat,
                artifact_path: input.artifact_path.to_string_lossy().into_owned(),
                device_type: input.device_type.clone(),
                args_info: input.args_info.clone(),
            },
        })
    }

    fn timeout(&self) -> Duration {
        self.rpc_config.session_timeout()
    }

    /// Stop accepting measurements and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

impl Runner for RpcRunner {
    #[instrument(level = "debug", skip_all, fields(count = inputs.len()))]
    fn run(&self, inputs: &[RunnerInput]) -> Vec<RunnerFuture> {
        inputs
            .iter()
            .map(|input| {
                let id = make_task_id("measure");
                debug!(task = %id, artifact = %input.artifact_path.display(), device = %input.device_type, "submitting");
                self.pool.submit(id, self.task_for(input), self.timeout())
            })
            .collect()
    }
}

impl fmt::Debug for RpcRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRunner")
            .field("kind", &self.pool.kind())
            .field("rpc_config", &self.rpc_config)
            .field("evaluator_config", &self.evaluator_config)
            .field("cooldown_sec", &self.cooldown_sec)
            .field("alloc_repeat", &self.alloc_repeat)
            .field("lifecycle", &self.refs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lifecycle::{DefaultAllocArgument, LifecycleError},
        pool::LocalWorkers,
        registry::LifecycleRegistry,
        remote::{Argument, RemoteDevice, RemoteSession},
        testing::{CountingCleanup, FakeEndpoint},
    };
    use rmeter_model::{ArgInfo, Flag};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingAlloc {
        calls: Arc<AtomicUsize>,
    }

    impl AllocArgument for CountingAlloc {
        fn alloc_argument(
            &self,
            session: &mut dyn RemoteSession,
            device: &dyn RemoteDevice,
            args_info: &[ArgInfo],
            alloc_repeat: usize,
        ) -> Result<Vec<Vec<Argument>>, LifecycleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            DefaultAllocArgument.alloc_argument(session, device, args_info, alloc_repeat)
        }
    }

    fn local(endpoint: &FakeEndpoint) -> Arc<dyn WorkerFactory> {
        let registry = LifecycleRegistry::new(Arc::new(endpoint.clone()));
        Arc::new(LocalWorkers::new(Arc::new(registry)))
    }

    fn evaluator(repeat: u32) -> EvaluatorConfig {
        EvaluatorConfig {
            number: 1,
            repeat,
            min_repeat_ms: 0,
            enable_cpu_cache_flush: Flag::disabled(),
        }
    }

    fn mm_input(device: &str) -> RunnerInput {
        RunnerInput::new("/tmp/build/mm.so", device, vec![ArgInfo::tensor("float32", vec![128, 128])])
    }

    #[tokio::test]
    async fn measures_alloc_repeat_times_repeat() {
        let endpoint = FakeEndpoint::new();
        let runner = RpcRunner::builder(local(&endpoint))
            .evaluator_config(evaluator(3))
            .alloc_repeat(2)
            .build()
            .await
            .unwrap();

        let futures = runner.run(&[mm_input("cpu")]);
        assert_eq!(futures.len(), 1);

        let res = futures[0].result().await;
        let costs = res.run_secs().expect("measurement should succeed");
        assert_eq!(costs.len(), 6);
        assert!(costs.iter().all(|c| *c >= 0.0));
        runner.shutdown().await;
    }

    #[tokio::test]
    async fn futures_follow_input_order() {
        let endpoint = FakeEndpoint::new();
        let runner = RpcRunner::builder(local(&endpoint)).max_workers(3).build().await.unwrap();
        let inputs = [mm_input("cpu"), mm_input("hexagon"), mm_input("cuda"), mm_input("cpu")];

        let futures = runner.run(&inputs);

        assert_eq!(futures.len(), inputs.len());
        let mut outcomes = Vec::new();
        for fut in &futures {
            outcomes.push(fut.result().await.is_success());
        }
        assert_eq!(outcomes, vec![true, false, true, true]);
        let failed = futures[1].result().await;
        assert!(failed.error_msg().unwrap().starts_with("RpcRunner: An exception occurred\n"));
        runner.shutdown().await;
    }

    #[tokio::test]
    async fn timeout_is_reported_promptly() {
        let endpoint = FakeEndpoint::new().slow_connect(Duration::from_secs(1));
        let runner = RpcRunner::builder(local(&endpoint))
            .rpc_config(RpcConfig {
                session_timeout_sec: 0.01,
                ..Default::default()
            })
            .build()
            .await
            .unwrap();

        let futures = runner.run(&[mm_input("cpu")]);
        let res = tokio::time::timeout(Duration::from_millis(500), futures[0].result())
            .await
            .expect("timeout must not wait for the blocked session");

        let msg = res.error_msg().unwrap();
        assert!(msg.contains("Timeout"), "got: {msg}");
        assert!(msg.contains("0.01 seconds"), "got: {msg}");
    }

    #[tokio::test]
    async fn unknown_override_fails_construction() {
        let endpoint = FakeEndpoint::new();

        let err = RpcRunner::builder(local(&endpoint))
            .alloc_argument(FunctionRef::named("does_not_exist"))
            .build()
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Resolve(ref m) if m.contains("does_not_exist")), "got: {err}");
        assert_eq!(endpoint.sessions(), 0);
    }

    #[tokio::test]
    async fn result_is_stable_across_calls() {
        let endpoint = FakeEndpoint::new();
        let runner = RpcRunner::builder(local(&endpoint)).build().await.unwrap();

        let fut = runner.run(&[mm_input("cpu")]).remove(0);
        let first = fut.result().await;

        assert!(fut.done());
        assert_eq!(fut.result().await, first);
        assert_eq!(fut.try_result(), Some(first));
    }

    #[tokio::test]
    async fn overrides_are_used_and_cleanup_runs_per_task() {
        let endpoint = FakeEndpoint::new();
        let alloc = CountingAlloc::default();
        let cleanup = CountingCleanup::default();
        let mut registry = LifecycleRegistry::new(Arc::new(endpoint.clone()));
        registry.register_cleanup("counting", Arc::new(cleanup.clone())).unwrap();
        let factory = Arc::new(LocalWorkers::new(Arc::new(registry)));

        let runner = RpcRunner::builder(factory)
            .max_workers(4)
            .alloc_argument(FunctionRef::Direct(Arc::new(alloc.clone())))
            .cleanup(FunctionRef::named("counting"))
            .build()
            .await
            .unwrap();

        let inputs: Vec<_> = (0..8).map(|_| mm_input("cpu")).collect();
        for fut in runner.run(&inputs) {
            assert!(fut.result().await.is_success());
        }
        runner.shutdown().await;

        assert_eq!(alloc.calls.load(Ordering::SeqCst), 8);
        assert_eq!(cleanup.calls(), 8);
        assert_eq!(endpoint.sessions(), 8);
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let endpoint = FakeEndpoint::new();

        let err = RpcRunner::builder(local(&endpoint)).alloc_repeat(0).build().await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));

        let err = RpcRunner::builder(local(&endpoint))
            .evaluator_config(evaluator(0))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Model(_)));

        let err = RpcRunner::builder(local(&endpoint)).max_workers(0).build().await.unwrap_err();
        assert!(matches!(err, CoreError::Pool(_)));
    }

    #[tokio::test]
    async fn cooldown_is_kept() {
        let endpoint = FakeEndpoint::new();
        let runner = RpcRunner::builder(local(&endpoint)).cooldown_sec(1.5).build().await.unwrap();

        assert_eq!(runner.cooldown_sec(), 1.5);
        assert_eq!(runner.alloc_repeat(), 1);
        assert_eq!(runner.rpc_config().session_priority, 1);
    }

    #[tokio::test]
    async fn closed_runner_still_returns_futures() {
        let endpoint = FakeEndpoint::new();
        let runner = RpcRunner::builder(local(&endpoint)).build().await.unwrap();
        runner.shutdown().await;

        let futures = runner.run(&[mm_input("cpu"), mm_input("cpu")]);

        assert_eq!(futures.len(), 2);
        for fut in futures {
            assert!(fut.done());
            assert!(!fut.result().await.is_success());
        }
    }
}
