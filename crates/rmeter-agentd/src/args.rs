use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use rmeter_observe::{LoggerConfig, LoggerFormat, LoggerLevel};

use crate::config::{AgentConfig, Isolation};

#[derive(Debug, Parser)]
#[command(name = "rmeter-agentd", version)]
#[command(about = "Measure compiled artifacts on remote devices through a pool of isolated workers")]
pub struct Cli {
    /// JSON config file (`logger`, `rpc`, `evaluator`, `maxWorkers`, `allocRepeat`, ...).
    #[arg(long, global = true, env = "RMETER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Measure artifacts and print one JSON result per line.
    Bench(BenchArgs),
    /// Serve measurement tasks on stdin/stdout. Started by `bench --isolation process`.
    Worker,
}

#[derive(Debug, Clone, Default, Args)]
pub struct LoggingArgs {
    /// `EnvFilter` expression, e.g. `info` or `rmeter_exec=trace,info`.
    #[arg(long, global = true, value_parser = parse_level)]
    pub log_level: Option<LoggerLevel>,

    #[arg(long, global = true, value_enum)]
    pub log_format: Option<FormatArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Text,
    Json,
    Journald,
}

impl From<FormatArg> for LoggerFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Text => LoggerFormat::Text,
            FormatArg::Json => LoggerFormat::Json,
            FormatArg::Journald => LoggerFormat::Journald,
        }
    }
}

impl LoggingArgs {
    pub fn apply(&self, logger: &mut LoggerConfig) {
        if let Some(level) = &self.log_level {
            logger.level = level.clone();
        }
        if let Some(format) = self.log_format {
            logger.format = format.into();
        }
    }

    /// Arguments that reproduce the effective logger settings in a worker process.
    pub fn forward(logger: &LoggerConfig) -> Vec<String> {
        vec![
            "--log-level".into(),
            logger.level.as_str().into(),
            "--log-format".into(),
            logger.format.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct BenchArgs {
    /// Artifacts to measure.
    #[arg(required_unless_present = "requests")]
    pub artifacts: Vec<PathBuf>,

    /// JSON array of requests (`artifactPath`, `deviceType`, `argsInfo`) instead of positional artifacts.
    #[arg(long, conflicts_with = "artifacts")]
    pub requests: Option<PathBuf>,

    /// Device kind for positional artifacts.
    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// Tensor argument as `dtype:d0xd1x...`, e.g. `float32:128x128`. Repeat for each argument.
    #[arg(long = "arg", value_name = "DTYPE:SHAPE")]
    pub args: Vec<String>,

    #[arg(long, value_enum)]
    pub isolation: Option<Isolation>,

    #[arg(long)]
    pub max_workers: Option<usize>,

    #[arg(long)]
    pub alloc_repeat: Option<usize>,

    /// Per-measurement budget in seconds.
    #[arg(long)]
    pub timeout: Option<f64>,

    #[arg(long)]
    pub number: Option<u32>,

    #[arg(long)]
    pub repeat: Option<u32>,

    #[arg(long)]
    pub min_repeat_ms: Option<u64>,

    #[arg(long)]
    pub cache_flush: bool,

    /// Print Prometheus metrics to stderr when done.
    #[arg(long)]
    pub metrics: bool,
}

impl BenchArgs {
    pub fn apply(&self, config: &mut AgentConfig) {
        if let Some(isolation) = self.isolation {
            config.isolation = isolation;
        }
        if let Some(n) = self.max_workers {
            config.max_workers = n;
        }
        if let Some(n) = self.alloc_repeat {
            config.alloc_repeat = n;
        }
        if let Some(secs) = self.timeout {
            config.rpc.session_timeout_sec = secs;
        }
        if let Some(n) = self.number {
            config.evaluator.number = n;
        }
        if let Some(n) = self.repeat {
            config.evaluator.repeat = n;
        }
        if let Some(ms) = self.min_repeat_ms {
            config.evaluator.min_repeat_ms = ms;
        }
        if self.cache_flush {
            config.evaluator.enable_cpu_cache_flush = true.into();
        }
    }
}

fn parse_level(s: &str) -> Result<LoggerLevel, String> {
    s.parse().map_err(|e: rmeter_observe::LoggerError| e.to_string())
}
