use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc as std_mpsc,
    },
    thread,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    pool::{Completion, PoolError, Worker, WorkerContext, WorkerFactory},
    registry::LifecycleRegistry,
    task::{TaskError, TaskResult, WorkerTask, execute_task},
};

/// Runs once on every new worker thread, with the slot index, before its first task.
pub type Initializer = Arc<dyn Fn(usize) + Send + Sync>;

/// In-process workers: one persistent OS thread per slot.
///
/// Tasks resolve against the shared `registry`, so direct overrides work here.
///
/// A timed-out task cannot be interrupted: its thread is abandoned and keeps running until the
/// blocking call returns. A call that never returns keeps its thread forever, one per timeout.
/// Use `ProcessWorkers` from `rmeter-exec` when remote calls can hang.
#[derive(Clone)]
pub struct LocalWorkers {
    registry: Arc<LifecycleRegistry>,
    initializer: Option<Initializer>,
    abandoned: Arc<AtomicUsize>,
}

impl LocalWorkers {
    pub fn new(registry: Arc<LifecycleRegistry>) -> Self {
        Self {
            registry,
            initializer: None,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_initializer(mut self, initializer: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    /// Abandoned threads, across all slots, that are still stuck in a timed-out task.
    pub fn abandoned_threads(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerFactory for LocalWorkers {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn spawn(&self, ctx: WorkerContext) -> Result<Box<dyn Worker>, PoolError> {
        let mut worker = LocalWorker {
            ctx,
            registry: Arc::clone(&self.registry),
            initializer: self.initializer.clone(),
            abandoned: Arc::clone(&self.abandoned),
            generation: 0,
            thread: None,
        };
        worker.start_thread()?;
        Ok(Box::new(worker))
    }
}

struct LocalJob {
    task: WorkerTask,
    cancel: CancellationToken,
    reply: oneshot::Sender<TaskResult>,
}

struct LocalWorker {
    ctx: WorkerContext,
    registry: Arc<LifecycleRegistry>,
    initializer: Option<Initializer>,
    abandoned: Arc<AtomicUsize>,
    generation: u32,
    thread: Option<WorkerThread>,
}

/// Sending half of a worker thread's queue.
struct WorkerThread {
    jobs: std_mpsc::Sender<LocalJob>,
    /// Set when the pool gives up on the thread's current task.
    abandoned: Arc<AtomicBool>,
}

impl LocalWorker {
    fn start_thread(&mut self) -> Result<(), PoolError> {
        let slot = self.ctx.slot();
        let (tx, rx) = std_mpsc::channel::<LocalJob>();
        let registry = Arc::clone(&self.registry);
        let initializer = self.initializer.clone();
        let flag = Arc::new(AtomicBool::new(false));
        let thread_flag = Arc::clone(&flag);
        let abandoned = Arc::clone(&self.abandoned);

        thread::Builder::new()
            .name(format!("rmeter-worker-{slot}.{}", self.generation))
            .spawn(move || {
                if let Some(init) = initializer {
                    init(slot);
                }
                for job in rx {
                    let result = execute_task(&job.task, &registry, &job.cancel);
                    if job.reply.send(result).is_err() {
                        trace!(slot, "task result discarded; the pool gave up on it");
                    }
                }
                if thread_flag.load(Ordering::SeqCst) {
                    let left = abandoned.fetch_sub(1, Ordering::SeqCst) - 1;
                    debug!(slot, still_abandoned = left, "abandoned worker thread finished");
                }
            })
            .map_err(|e| PoolError::Spawn {
                slot,
                reason: e.to_string(),
            })?;

        self.generation += 1;
        self.thread = Some(WorkerThread { jobs: tx, abandoned: flag });
        Ok(())
    }

    fn broken(&mut self, reason: &str) -> PoolError {
        self.thread = None;
        PoolError::Broken {
            slot: self.ctx.slot(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Worker for LocalWorker {
    async fn execute(&mut self, task: WorkerTask, timeout: Duration, done: Completion) -> Result<(), PoolError> {
        if self.thread.is_none() {
            self.start_thread()?;
        }
        let Some(thread) = self.thread.as_ref() else {
            return Err(self.broken("no worker thread"));
        };

        let (reply, reply_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let job = LocalJob {
            task,
            cancel: cancel.clone(),
            reply,
        };
        if thread.jobs.send(job).is_err() {
            return Err(self.broken("worker thread exited"));
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => {
                done.complete(result);
                Ok(())
            }
            Ok(Err(_)) => Err(self.broken("worker thread exited while running a task")),
            Err(_) => {
                // Counted before the sender drops, so the thread's decrement always follows.
                let abandoned = self.abandoned.fetch_add(1, Ordering::SeqCst) + 1;
                // Dropping the sender ends the abandoned thread after its current task.
                if let Some(stuck) = self.thread.take() {
                    stuck.abandoned.store(true, Ordering::SeqCst);
                }
                done.complete(Err(TaskError::Timeout {
                    secs: timeout.as_secs_f64(),
                }));
                cancel.cancel();
                self.ctx.report("abandoned");
                warn!(
                    slot = self.ctx.slot(),
                    ?timeout,
                    abandoned,
                    "task timed out; abandoning its thread, which cleans up when the blocking call returns"
                );
                self.start_thread()
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.thread.take().is_some() {
            debug!(slot = self.ctx.slot(), "local worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metrics::noop_metrics,
        pool::WorkerPool,
        registry::LifecycleRefs,
        task::{MeasurePayload, MeasureTask},
        testing::FakeEndpoint,
    };
    use rmeter_model::ArgInfo;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    fn measure() -> WorkerTask {
        WorkerTask::Measure(MeasureTask {
            refs: LifecycleRefs::default(),
            payload: MeasurePayload {
                rpc_config: Default::default(),
                evaluator_config: Default::default(),
                alloc_repeat: 1,
                artifact_path: "/tmp/conv.so".into(),
                device_type: "cpu".into(),
                args_info: vec![ArgInfo::tensor("float32", vec![16])],
            },
        })
    }

    #[tokio::test]
    async fn initializer_runs_once_per_thread() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = LocalWorkers::new(Arc::new(LifecycleRegistry::new(Arc::new(FakeEndpoint::new()))))
            .with_initializer({
                let seen = Arc::clone(&seen);
                move |slot| seen.lock().unwrap().push(slot)
            });
        let pool = WorkerPool::start(Arc::new(factory), 2, noop_metrics()).await.unwrap();

        for i in 0..4 {
            let fut = pool.submit(format!("m{i}"), measure(), Duration::from_secs(5));
            assert!(fut.result().await.is_success());
        }
        pool.shutdown().await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1]);
    }

    #[tokio::test]
    async fn abandoned_threads_are_counted_until_they_return() {
        let endpoint = FakeEndpoint::new().slow_connect(Duration::from_millis(300));
        let factory = LocalWorkers::new(Arc::new(LifecycleRegistry::new(Arc::new(endpoint))));
        let pool = WorkerPool::start(Arc::new(factory.clone()), 1, noop_metrics()).await.unwrap();
        assert_eq!(factory.abandoned_threads(), 0);

        let slow = pool.submit("slow".into(), measure(), Duration::from_millis(20));
        assert!(slow.result().await.error_msg().unwrap().contains("Timeout"));
        assert_eq!(factory.abandoned_threads(), 1);

        let mut waited = Duration::ZERO;
        while factory.abandoned_threads() > 0 && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert_eq!(factory.abandoned_threads(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn timeout_abandons_thread_and_keeps_serving() {
        let endpoint = FakeEndpoint::new().slow_connect(Duration::from_millis(300));
        let registry = Arc::new(LifecycleRegistry::new(Arc::new(endpoint.clone())));
        let spawned = Arc::new(AtomicUsize::new(0));
        let factory = LocalWorkers::new(registry).with_initializer({
            let spawned = Arc::clone(&spawned);
            move |_| {
                spawned.fetch_add(1, Ordering::SeqCst);
            }
        });
        let pool = WorkerPool::start(Arc::new(factory), 1, noop_metrics()).await.unwrap();

        let slow = pool.submit("slow".into(), measure(), Duration::from_millis(20));
        let res = tokio::time::timeout(Duration::from_millis(200), slow.result())
            .await
            .expect("timeout must resolve before the blocked call returns");
        assert!(res.error_msg().unwrap().contains("Timeout"));

        let next = pool.submit("next".into(), measure(), Duration::from_secs(5));
        assert!(next.result().await.is_success());

        pool.shutdown().await;
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
    }
}
