//! Worker processes for the measurement pool.
//!
//! The orchestrator side is [`ProcessWorkers`], a [`rmeter_core::WorkerFactory`] that keeps one
//! child process per pool slot. The child side is [`WorkerMain`], which a worker binary runs
//! with its own [`rmeter_core::LifecycleRegistry`]. Both speak the JSON-lines [`protocol`].
mod error;
pub use error::ExecError;

pub mod protocol;

mod limits;
pub use limits::{RlimitConfig, attach_rlimits};

mod config;
pub use config::ProcessWorkerConfig;

mod worker;
pub use worker::ProcessWorkers;

mod serve;
pub use serve::WorkerMain;
