use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use clap::ValueEnum;
use serde::Deserialize;

use rmeter_exec::RlimitConfig;
use rmeter_model::{EvaluatorConfig, RpcConfig};
use rmeter_observe::LoggerConfig;

/// Where measurements run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Threads of this process.
    Local,
    /// One child process per worker slot.
    #[default]
    Process,
}

/// Agent configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub logger: LoggerConfig,
    pub rpc: RpcConfig,
    pub evaluator: EvaluatorConfig,
    pub max_workers: usize,
    pub alloc_repeat: usize,
    pub cooldown_sec: f64,
    pub isolation: Isolation,
    /// Applied to worker processes.
    pub rlimits: RlimitConfig,
    /// Grace period before a worker that ignores a cancel frame is killed.
    pub kill_grace_ms: u64,
    /// Device kinds the simulated endpoint exposes.
    pub sim_devices: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            logger: LoggerConfig::default(),
            rpc: RpcConfig::default(),
            evaluator: EvaluatorConfig::default(),
            max_workers: 1,
            alloc_repeat: 1,
            cooldown_sec: 0.0,
            isolation: Isolation::default(),
            rlimits: RlimitConfig::default(),
            kill_grace_ms: 2_000,
            sim_devices: vec!["cpu".into()],
        }
    }
}

impl AgentConfig {
    /// Defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}
