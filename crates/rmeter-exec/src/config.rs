use std::{fmt, path::PathBuf, process::Stdio, time::Duration};

use tokio::process::Command;
use tracing::trace;

use crate::{ExecError, RlimitConfig, attach_rlimits};

/// How to launch the worker processes of a pool.
#[derive(Debug, Clone)]
pub struct ProcessWorkerConfig {
    /// Worker executable. Must run [`crate::WorkerMain`].
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment on top of the inherited one.
    pub env: Vec<(String, String)>,
    pub rlimits: Option<RlimitConfig>,
    /// How long a worker may take to finish a canceled task before it is killed.
    pub kill_grace: Duration,
    /// How long a fresh worker may take to report ready.
    pub startup_timeout: Duration,
}

impl ProcessWorkerConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            rlimits: None,
            kill_grace: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_rlimits(mut self, rlimits: RlimitConfig) -> Self {
        self.rlimits = Some(rlimits);
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        if self.program.as_os_str().is_empty() {
            return Err(ExecError::InvalidConfig("worker program is empty".into()));
        }
        if let Some((key, _)) = self.env.iter().find(|(k, _)| k.is_empty() || k.contains('=')) {
            return Err(ExecError::InvalidConfig(format!("invalid environment key {key:?}")));
        }
        if self.startup_timeout.is_zero() {
            return Err(ExecError::InvalidConfig("startup_timeout must be positive".into()));
        }
        Ok(())
    }

    /// Command for slot `slot`, with piped stdio and limits applied.
    pub(crate) fn command(&self, slot: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("RMETER_WORKER_SLOT", slot.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(rlimits) = &self.rlimits {
            attach_rlimits(&mut cmd, rlimits);
        }
        trace!(slot, program = %self.program.display(), args = ?self.args, env_len = self.env.len(), "worker command built");
        cmd
    }
}

impl fmt::Display for ProcessWorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProcessWorkerConfig(program='{}', args={}, env={}, rlimits={}, kill_grace={:?})",
            self.program.display(),
            self.args.len(),
            self.env.len(),
            self.rlimits.is_some(),
            self.kill_grace,
        )
    }
}
