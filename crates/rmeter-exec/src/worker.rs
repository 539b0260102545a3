use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout},
    time::Instant,
};
use tracing::{debug, info, trace, warn};

use rmeter_core::{Completion, PoolError, TaskError, TaskResult, Worker, WorkerContext, WorkerFactory, WorkerTask};

use crate::{
    ExecError, ProcessWorkerConfig,
    protocol::{Reply, Request, decode_frame, encode_frame},
};

/// Worker factory backed by child processes, one per pool slot.
///
/// Lifecycle overrides must be referenced by name; the child resolves them in its own registry.
#[derive(Debug, Clone)]
pub struct ProcessWorkers {
    config: Arc<ProcessWorkerConfig>,
}

impl ProcessWorkers {
    pub fn new(config: ProcessWorkerConfig) -> Result<Self, ExecError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl WorkerFactory for ProcessWorkers {
    fn kind(&self) -> &'static str {
        "process"
    }

    async fn spawn(&self, ctx: WorkerContext) -> Result<Box<dyn Worker>, PoolError> {
        let process = WorkerProcess::start(&self.config, ctx.slot())
            .await
            .map_err(|e| PoolError::Spawn {
                slot: ctx.slot(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(ProcessWorker {
            ctx,
            config: Arc::clone(&self.config),
            process: Some(process),
            next_id: 1,
        }))
    }
}

/// One running child with its stdio pipes.
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
    pid: u32,
}

impl WorkerProcess {
    async fn start(config: &ProcessWorkerConfig, slot: usize) -> Result<Self, ExecError> {
        let mut child = config.command(slot).spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecError::Protocol("worker stdin is not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Protocol("worker stdout is not piped".into()))?;

        let mut process = Self {
            child,
            stdin,
            replies: BufReader::new(stdout).lines(),
            pid: 0,
        };
        let ready = tokio::time::timeout(config.startup_timeout, process.next_reply())
            .await
            .map_err(|_| ExecError::StartupTimeout(config.startup_timeout))??;
        match ready {
            Reply::Ready { pid } => {
                process.pid = pid;
                info!(slot, pid, "worker process ready");
                Ok(process)
            }
            other => Err(ExecError::Protocol(format!("expected ready frame, got {other:?}"))),
        }
    }

    async fn send(&mut self, request: &Request) -> Result<(), ExecError> {
        let line = encode_frame(request)?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn next_reply(&mut self) -> Result<Reply, ExecError> {
        loop {
            let Some(line) = self.replies.next_line().await? else {
                let status = self.child.try_wait()?;
                return Err(ExecError::Exited(match status {
                    Some(status) => status.to_string(),
                    None => "stdout closed".into(),
                }));
            };
            if line.trim().is_empty() {
                continue;
            }
            return decode_frame(&line);
        }
    }

    /// Read replies until task `id` is done, skipping late replies of earlier tasks.
    async fn wait_done(&mut self, id: u64) -> Result<TaskResult, ExecError> {
        loop {
            match self.next_reply().await? {
                Reply::Done { id: got, result } if got == id => return Ok(result),
                Reply::Done { id: stale, .. } => trace!(pid = self.pid, stale, "discarding late reply"),
                Reply::Ready { .. } => return Err(ExecError::Protocol("unexpected ready frame".into())),
            }
        }
    }

    async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(pid = self.pid, error = %e, "failed to kill worker process");
        }
    }

    /// Close stdin and give the worker `grace` to exit on its own.
    async fn stop(mut self, grace: Duration) {
        drop(self.stdin);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(pid = self.pid, %status, "worker process exited"),
            Ok(Err(e)) => debug!(pid = self.pid, error = %e, "failed to reap worker process"),
            Err(_) => {
                warn!(pid = self.pid, "worker process ignored shutdown; killing it");
                if let Err(e) = self.child.kill().await {
                    debug!(pid = self.pid, error = %e, "failed to kill worker process");
                }
            }
        }
    }
}

struct ProcessWorker {
    ctx: WorkerContext,
    config: Arc<ProcessWorkerConfig>,
    process: Option<WorkerProcess>,
    next_id: u64,
}

impl ProcessWorker {
    async fn ensure_process(&mut self) -> Result<&mut WorkerProcess, PoolError> {
        if self.process.is_none() {
            let process = WorkerProcess::start(&self.config, self.ctx.slot())
                .await
                .map_err(|e| {
                    self.ctx.report("spawn");
                    PoolError::Spawn {
                        slot: self.ctx.slot(),
                        reason: e.to_string(),
                    }
                })?;
            info!(slot = self.ctx.slot(), pid = process.pid, "worker process respawned");
            self.process = Some(process);
        }
        self.process.as_mut().ok_or_else(|| PoolError::Broken {
            slot: self.ctx.slot(),
            reason: "no worker process".into(),
        })
    }

    /// Forget the current process; the next task starts a fresh one.
    async fn discard(&mut self, kind: &str) {
        self.ctx.report(kind);
        if let Some(process) = self.process.take() {
            process.kill().await;
        }
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    async fn execute(&mut self, task: WorkerTask, timeout: Duration, done: Completion) -> Result<(), PoolError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = match Request::for_task(id, &task) {
            Ok(request) => request,
            Err(e) => {
                done.complete(Err(TaskError::resolve(e)));
                return Ok(());
            }
        };

        let slot = self.ctx.slot();
        let grace = self.config.kill_grace;
        let process = self.ensure_process().await?;
        let pid = process.pid;
        // A respawn after a crash or kill is not charged to this task.
        let deadline = Instant::now() + timeout;
        if let Err(e) = process.send(&request).await {
            warn!(slot, pid, error = %e, "cannot send task to worker process");
            done.complete(Err(TaskError::worker(e)));
            self.discard("crash").await;
            return Ok(());
        }
        trace!(slot, pid, id, kind = task.kind(), "task sent");

        match tokio::time::timeout_at(deadline, process.wait_done(id)).await {
            Ok(Ok(result)) => {
                done.complete(result);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(slot, pid, error = %e, "worker process failed during a task");
                done.complete(Err(TaskError::worker(e)));
                self.discard("crash").await;
                Ok(())
            }
            Err(_) => {
                done.complete(Err(TaskError::Timeout {
                    secs: timeout.as_secs_f64(),
                }));
                let stopped = match process.send(&Request::Cancel { id }).await {
                    Ok(()) => matches!(tokio::time::timeout(grace, process.wait_done(id)).await, Ok(Ok(_))),
                    Err(_) => false,
                };
                if stopped {
                    debug!(slot, pid, id, "worker process stopped the timed-out task");
                } else {
                    warn!(
                        slot,
                        pid,
                        id,
                        ?grace,
                        "worker process did not stop the timed-out task; killing it, remote files may be left behind"
                    );
                    self.discard("killed").await;
                }
                Ok(())
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(process) = self.process.take() {
            process.stop(self.config.kill_grace).await;
        }
    }
}
