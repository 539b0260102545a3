//! Fixed-size worker pool.
//!
//! `max_workers` driver tasks share one FIFO queue. Each driver owns one persistent
//! [`Worker`] produced by a [`WorkerFactory`] and hands it one job at a time; the job
//! resolves its caller's future through a [`Completion`].
mod error;
pub use error::PoolError;

mod context;
pub use context::{Completion, WorkerContext};

mod local;
pub use local::{Initializer, LocalWorkers};

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    future::RunnerFuture,
    metrics::MetricsHandle,
    task::{TaskError, TaskResult, WorkerTask},
};

/// One persistent execution slot.
///
/// `execute` must resolve `done` (or drop it) before returning and must enforce `timeout`
/// itself, resolving `done` with [`TaskError::Timeout`] as soon as it expires.
/// An `Err` means the worker can no longer be used and the pool replaces it.
#[async_trait]
pub trait Worker: Send {
    async fn execute(&mut self, task: WorkerTask, timeout: Duration, done: Completion) -> Result<(), PoolError>;

    /// Release the worker. Called once, when the pool drains.
    async fn shutdown(&mut self);
}

/// Produces the workers of a pool.
#[async_trait]
pub trait WorkerFactory: Send + Sync + 'static {
    /// Label used in logs and metrics.
    fn kind(&self) -> &'static str;

    async fn spawn(&self, ctx: WorkerContext) -> Result<Box<dyn Worker>, PoolError>;
}

struct PoolJob {
    id: String,
    task: WorkerTask,
    timeout: Duration,
    tx: watch::Sender<Option<TaskResult>>,
}

type SharedQueue = Arc<AsyncMutex<mpsc::UnboundedReceiver<PoolJob>>>;

/// Handle to a running pool.
pub struct WorkerPool {
    kind: &'static str,
    queue: Mutex<Option<mpsc::UnboundedSender<PoolJob>>>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `max_workers` workers and their drivers.
    ///
    /// Fails if any worker cannot be spawned; already spawned workers are shut down.
    #[instrument(level = "debug", skip(factory, metrics), fields(kind = factory.kind()))]
    pub async fn start(
        factory: Arc<dyn WorkerFactory>,
        max_workers: usize,
        metrics: MetricsHandle,
    ) -> Result<Self, PoolError> {
        if max_workers == 0 {
            return Err(PoolError::InvalidConfig("max_workers must be at least 1".into()));
        }
        let kind = factory.kind();

        let mut workers = Vec::with_capacity(max_workers);
        for slot in 0..max_workers {
            let ctx = WorkerContext::new(slot, kind, metrics.clone());
            match factory.spawn(ctx.clone()).await {
                Ok(worker) => workers.push((ctx, worker)),
                Err(e) => {
                    metrics.record_worker_error(kind, "spawn");
                    for (_, mut w) in workers {
                        w.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let queue: SharedQueue = Arc::new(AsyncMutex::new(rx));
        let drivers = workers
            .into_iter()
            .map(|(ctx, worker)| tokio::spawn(drive(Arc::clone(&factory), ctx, worker, Arc::clone(&queue))))
            .collect();

        info!(kind, max_workers, "worker pool started");
        Ok(Self {
            kind,
            queue: Mutex::new(Some(tx)),
            drivers: Mutex::new(drivers),
        })
    }

    /// Factory kind of this pool's workers.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Queue a task. Never fails: a closed pool yields an already-finished future.
    pub fn submit(&self, id: String, task: WorkerTask, timeout: Duration) -> RunnerFuture {
        let rx = self.enqueue(id.clone(), task, timeout).unwrap_or_else(|closed| closed);
        RunnerFuture::new(id, timeout.as_secs_f64(), rx)
    }

    /// Queue a task and wait for its raw outcome.
    pub async fn run(&self, id: String, task: WorkerTask, timeout: Duration) -> Result<TaskResult, PoolError> {
        let mut rx = self.enqueue(id, task, timeout).map_err(|_| PoolError::Closed)?;
        let outcome = rx.wait_for(Option::is_some).await.map_err(|_| PoolError::Closed)?;
        outcome.clone().ok_or(PoolError::Closed)
    }

    /// `Err` carries a receiver whose sender is already gone.
    fn enqueue(
        &self,
        id: String,
        task: WorkerTask,
        timeout: Duration,
    ) -> Result<watch::Receiver<Option<TaskResult>>, watch::Receiver<Option<TaskResult>>> {
        let (tx, rx) = watch::channel(None);
        let guard = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = guard.as_ref() else {
            debug!(task = %id, "pool closed; task rejected");
            return Err(rx);
        };
        debug!(task = %id, kind = task.kind(), ?timeout, "task queued");
        match queue.send(PoolJob { id, task, timeout, tx }) {
            Ok(()) => Ok(rx),
            Err(_) => Err(rx),
        }
    }

    /// Stop accepting tasks, let the workers drain the queue, then shut them down.
    pub async fn shutdown(&self) {
        drop(self.queue.lock().unwrap_or_else(PoisonError::into_inner).take());
        let drivers = std::mem::take(&mut *self.drivers.lock().unwrap_or_else(PoisonError::into_inner));
        for driver in drivers {
            if let Err(e) = driver.await {
                warn!(kind = self.kind, error = %e, "pool driver ended abnormally");
            }
        }
        info!(kind = self.kind, "worker pool stopped");
    }
}

async fn drive(factory: Arc<dyn WorkerFactory>, ctx: WorkerContext, worker: Box<dyn Worker>, queue: SharedQueue) {
    let slot = ctx.slot();
    let mut worker = Some(worker);

    loop {
        let job = { queue.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        if worker.is_none() {
            match factory.spawn(ctx.clone()).await {
                Ok(w) => {
                    info!(slot, kind = ctx.pool(), "worker replaced");
                    worker = Some(w);
                }
                Err(e) => {
                    ctx.report("spawn");
                    warn!(slot, task = %job.id, error = %e, "no worker available for task");
                    ctx.completion(job.tx).complete(Err(TaskError::worker(e)));
                    continue;
                }
            }
        }
        let Some(w) = worker.as_mut() else {
            continue;
        };

        debug!(slot, task = %job.id, kind = job.task.kind(), "task started");
        let done = ctx.completion(job.tx);
        if let Err(e) = w.execute(job.task, job.timeout, done).await {
            ctx.report("broken");
            warn!(slot, task = %job.id, error = %e, "worker failed; replacing it");
            if let Some(mut broken) = worker.take() {
                broken.shutdown().await;
            }
        }
    }

    if let Some(mut w) = worker {
        w.shutdown().await;
    }
    debug!(slot, "pool driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metrics::noop_metrics,
        registry::LifecycleRefs,
        task::{MeasurePayload, MeasureTask},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Factory whose workers answer from a script instead of running lifecycles.
    struct Scripted {
        spawned: Arc<AtomicUsize>,
        fail_spawn_after: Option<usize>,
    }

    struct ScriptedWorker {
        slot: usize,
        executed: usize,
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        async fn execute(&mut self, task: WorkerTask, _timeout: Duration, done: Completion) -> Result<(), PoolError> {
            self.executed += 1;
            match task {
                WorkerTask::Check(_) => {
                    drop(done);
                    Err(PoolError::Broken {
                        slot: self.slot,
                        reason: "scripted crash".into(),
                    })
                }
                WorkerTask::Measure(_) => {
                    done.complete(Ok(vec![self.slot as f64]));
                    Ok(())
                }
            }
        }

        async fn shutdown(&mut self) {}
    }

    #[async_trait]
    impl WorkerFactory for Scripted {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        async fn spawn(&self, ctx: WorkerContext) -> Result<Box<dyn Worker>, PoolError> {
            let n = self.spawned.fetch_add(1, Ordering::SeqCst);
            if self.fail_spawn_after.is_some_and(|limit| n >= limit) {
                return Err(PoolError::Spawn {
                    slot: ctx.slot(),
                    reason: "scripted".into(),
                });
            }
            Ok(Box::new(ScriptedWorker {
                slot: ctx.slot(),
                executed: 0,
            }))
        }
    }

    fn scripted(fail_spawn_after: Option<usize>) -> (Arc<AtomicUsize>, Arc<dyn WorkerFactory>) {
        let spawned = Arc::new(AtomicUsize::new(0));
        let factory = Scripted {
            spawned: Arc::clone(&spawned),
            fail_spawn_after,
        };
        (spawned, Arc::new(factory))
    }

    fn measure() -> WorkerTask {
        WorkerTask::Measure(MeasureTask {
            refs: LifecycleRefs::default(),
            payload: MeasurePayload {
                rpc_config: Default::default(),
                evaluator_config: Default::default(),
                alloc_repeat: 1,
                artifact_path: "a.so".into(),
                device_type: "cpu".into(),
                args_info: Vec::new(),
            },
        })
    }

    #[tokio::test]
    async fn zero_workers_is_rejected() {
        let (_, factory) = scripted(None);
        let err = WorkerPool::start(factory, 0, noop_metrics()).await.err().unwrap();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn spawn_failure_fails_start() {
        let (_, factory) = scripted(Some(1));
        let err = WorkerPool::start(factory, 2, noop_metrics()).await.err().unwrap();
        assert!(matches!(err, PoolError::Spawn { slot: 1, .. }));
    }

    #[tokio::test]
    async fn broken_worker_is_replaced() {
        let (spawned, factory) = scripted(None);
        let pool = WorkerPool::start(factory, 1, noop_metrics()).await.unwrap();

        let crashed = pool
            .run("c".into(), WorkerTask::Check(LifecycleRefs::default()), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(crashed, Err(TaskError::Worker { .. })));

        let ok = pool.submit("m".into(), measure(), Duration::from_secs(1));
        assert!(ok.result().await.is_success());
        assert_eq!(spawned.load(Ordering::SeqCst), 2);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn unavailable_replacement_fails_the_task_only() {
        let (_, factory) = scripted(Some(1));
        let pool = WorkerPool::start(factory, 1, noop_metrics()).await.unwrap();

        let _ = pool
            .run("c".into(), WorkerTask::Check(LifecycleRefs::default()), Duration::from_secs(1))
            .await
            .unwrap();
        let fut = pool.submit("m".into(), measure(), Duration::from_secs(1));

        let msg = fut.result().await.error_msg().map(str::to_string).unwrap();
        assert!(msg.contains("failed to spawn worker"), "got: {msg}");
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn closed_pool_resolves_immediately() {
        let (_, factory) = scripted(None);
        let pool = WorkerPool::start(factory, 1, noop_metrics()).await.unwrap();
        pool.shutdown().await;

        let fut = pool.submit("late".into(), measure(), Duration::from_secs(1));
        assert!(fut.done());
        assert!(fut.result().await.error_msg().unwrap().contains("pool shut down"));

        let err = pool.run("late".into(), measure(), Duration::from_secs(1)).await;
        assert!(matches!(err, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn shutdown_drains_queued_tasks() {
        let (_, factory) = scripted(None);
        let pool = WorkerPool::start(factory, 2, noop_metrics()).await.unwrap();

        let futures: Vec<_> = (0..8)
            .map(|i| pool.submit(format!("m{i}"), measure(), Duration::from_secs(1)))
            .collect();
        pool.shutdown().await;

        for fut in futures {
            assert!(fut.done());
            assert!(fut.result().await.is_success());
        }
    }
}
