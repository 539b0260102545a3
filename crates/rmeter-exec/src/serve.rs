use std::{
    collections::HashMap,
    io::{self, BufRead, Write},
    sync::{Arc, Mutex, PoisonError, mpsc},
    thread,
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use rmeter_core::{LifecycleRegistry, WorkerTask, execute_task};

use crate::{
    ExecError,
    protocol::{Reply, Request, decode_frame, write_frame},
};

/// Cancellation tokens of accepted, unfinished tasks.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashMap<u64, CancellationToken>>>);

impl InFlight {
    fn admit(&self, id: u64) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(id, token.clone());
        token
    }

    fn cancel(&self, id: u64) -> bool {
        match self.lock().get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn finish(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Entry point of a worker process.
///
/// Announces itself with a ready frame, then executes tasks read from stdin one at a time,
/// answering each with a done frame on stdout. A separate reader thread handles cancel frames
/// while a task runs. Returns when stdin closes.
///
/// Logging must go to stderr: stdout carries the protocol.
pub struct WorkerMain {
    registry: LifecycleRegistry,
    initializer: Option<Box<dyn FnOnce() + Send>>,
}

impl WorkerMain {
    pub fn new(registry: LifecycleRegistry) -> Self {
        Self {
            registry,
            initializer: None,
        }
    }

    /// Run `f` once in the worker process before the ready frame.
    pub fn with_initializer(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.initializer = Some(Box::new(f));
        self
    }

    /// Serve on the process's stdin and stdout.
    pub fn serve(self) -> Result<(), ExecError> {
        let stdin = io::BufReader::new(io::stdin());
        self.serve_io(stdin, io::stdout().lock())
    }

    /// Serve on arbitrary streams.
    pub fn serve_io<R, W>(self, input: R, mut output: W) -> Result<(), ExecError>
    where
        R: BufRead + Send + 'static,
        W: Write,
    {
        if let Some(init) = self.initializer {
            init();
        }

        let pid = std::process::id();
        write_frame(&mut output, &Reply::Ready { pid })?;
        output.flush()?;
        info!(pid, registry = ?self.registry, "worker ready");

        let in_flight = InFlight::default();
        let (tx, rx) = mpsc::channel::<(u64, WorkerTask, CancellationToken)>();
        let reader = thread::Builder::new().name("rmeter-worker-stdin".into()).spawn({
            let in_flight = in_flight.clone();
            move || read_requests(input, tx, in_flight)
        })?;

        for (id, task, cancel) in rx {
            debug!(id, kind = task.kind(), "task started");
            let result = execute_task(&task, &self.registry, &cancel);
            in_flight.finish(id);
            trace!(id, ok = result.is_ok(), "task finished");
            write_frame(&mut output, &Reply::Done { id, result })?;
            output.flush()?;
        }

        let read = reader
            .join()
            .map_err(|_| ExecError::Protocol("stdin reader panicked".into()))?;
        info!(pid, "stdin closed; worker exiting");
        read
    }
}

fn read_requests<R: BufRead>(
    input: R,
    tasks: mpsc::Sender<(u64, WorkerTask, CancellationToken)>,
    in_flight: InFlight,
) -> Result<(), ExecError> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request = match decode_frame::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "ignoring malformed request");
                continue;
            }
        };

        if let Request::Cancel { id } = request {
            if in_flight.cancel(id) {
                debug!(id, "cancel requested");
            } else {
                trace!(id, "cancel for a task that is not running");
            }
            continue;
        }
        if let Some((id, task)) = request.into_task() {
            let cancel = in_flight.admit(id);
            if tasks.send((id, task, cancel)).is_err() {
                return Err(ExecError::Protocol("task executor stopped".into()));
            }
        }
    }
    Ok(())
}
