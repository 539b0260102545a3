//! Line-delimited JSON frames exchanged with worker processes.
//!
//! The orchestrator writes [`Request`]s to the worker's stdin; the worker answers on stdout
//! with one [`Reply::Ready`] at startup and one [`Reply::Done`] per task. Stderr is left to
//! the worker's logger.
use std::io::Write;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use rmeter_core::{LifecycleNames, MeasurePayload, MeasureTask, ResolveError, TaskResult, WorkerTask};

use crate::ExecError;

/// Orchestrator → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    /// Resolve the named lifecycle without running it.
    Check { id: u64, names: LifecycleNames },
    /// Run a measurement.
    Measure {
        id: u64,
        names: LifecycleNames,
        payload: MeasurePayload,
    },
    /// Stop task `id` at its next step boundary.
    Cancel { id: u64 },
}

impl Request {
    /// Frame for `task`. Fails when an override cannot cross the process boundary.
    pub fn for_task(id: u64, task: &WorkerTask) -> Result<Self, ResolveError> {
        Ok(match task {
            WorkerTask::Check(refs) => Request::Check {
                id,
                names: refs.to_names()?,
            },
            WorkerTask::Measure(task) => Request::Measure {
                id,
                names: task.refs.to_names()?,
                payload: task.payload.clone(),
            },
        })
    }

    /// Task carried by the frame; `None` for control frames.
    pub fn into_task(self) -> Option<(u64, WorkerTask)> {
        match self {
            Request::Check { id, names } => Some((id, WorkerTask::Check(names.into()))),
            Request::Measure { id, names, payload } => Some((
                id,
                WorkerTask::Measure(MeasureTask {
                    refs: names.into(),
                    payload,
                }),
            )),
            Request::Cancel { .. } => None,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Request::Check { id, .. } | Request::Measure { id, .. } | Request::Cancel { id } => *id,
        }
    }
}

/// Worker → orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Reply {
    Ready { pid: u32 },
    Done { id: u64, result: TaskResult },
}

/// Serialize `frame` as one line, without flushing.
pub fn write_frame<W: Write, T: Serialize>(out: &mut W, frame: &T) -> Result<(), ExecError> {
    serde_json::to_writer(&mut *out, frame)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Encode `frame` as a newline-terminated string.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String, ExecError> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T, ExecError> {
    Ok(serde_json::from_str(line.trim_end())?)
}
