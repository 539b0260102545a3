use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use rmeter_core::{LocalWorkers, RpcRunner, Runner, WorkerFactory};
use rmeter_exec::{ProcessWorkerConfig, ProcessWorkers};
use rmeter_model::{ArgInfo, RunnerInput, RunnerResult};
use rmeter_prometheus::{Encoder, PrometheusMetrics, TextEncoder};

use crate::{
    args::{BenchArgs, LoggingArgs},
    config::{AgentConfig, Isolation},
    endpoint,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    artifact_path: &'a Path,
    device_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mean_secs: Option<f64>,
    #[serde(flatten)]
    result: &'a RunnerResult,
}

/// Body of the `bench` subcommand.
pub async fn run(config: AgentConfig, args: BenchArgs, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let inputs = requests(&args)?;
    let metrics = PrometheusMetrics::new()?;

    let runner = RpcRunner::builder(factory(&config, config_path.as_deref())?)
        .rpc_config(config.rpc.clone())
        .evaluator_config(config.evaluator.clone())
        .cooldown_sec(config.cooldown_sec)
        .alloc_repeat(config.alloc_repeat)
        .max_workers(config.max_workers)
        .metrics(Arc::new(metrics.clone()))
        .build()
        .await?;
    info!(?runner, count = inputs.len(), "runner ready");

    let futures = runner.run(&inputs);
    let mut results = Vec::with_capacity(futures.len());
    for fut in &futures {
        results.push(fut.result().await);
    }
    runner.shutdown().await;

    let mut out = std::io::stdout().lock();
    let mut failed = 0usize;
    for (input, result) in inputs.iter().zip(&results) {
        if let Some(msg) = result.error_msg() {
            failed += 1;
            debug!(artifact = %input.artifact_path.display(), error = msg, "measurement failed");
        }
        let report = Report {
            artifact_path: &input.artifact_path,
            device_type: &input.device_type,
            mean_secs: result.mean_secs(),
            result,
        };
        serde_json::to_writer(&mut out, &report)?;
        writeln!(out)?;
    }
    out.flush()?;

    if args.metrics {
        let mut err = std::io::stderr().lock();
        TextEncoder::new().encode(&metrics.gather(), &mut err)?;
    }
    if failed > 0 {
        warn!(failed, total = results.len(), "some measurements failed");
    } else {
        info!(total = results.len(), "all measurements succeeded");
    }
    Ok(())
}

fn factory(config: &AgentConfig, config_path: Option<&Path>) -> anyhow::Result<Arc<dyn WorkerFactory>> {
    Ok(match config.isolation {
        Isolation::Local => {
            let workers = LocalWorkers::new(Arc::new(endpoint::registry(config)))
                .with_initializer(|slot| debug!(slot, "local worker thread started"));
            Arc::new(workers)
        }
        Isolation::Process => Arc::new(ProcessWorkers::new(process_config(config, config_path)?)?),
    })
}

/// Worker processes re-run this executable with the `worker` subcommand.
fn process_config(config: &AgentConfig, config_path: Option<&Path>) -> anyhow::Result<ProcessWorkerConfig> {
    let exe = std::env::current_exe().context("locating the agent executable")?;

    let mut args = LoggingArgs::forward(&config.logger);
    if let Some(path) = config_path {
        args.push("--config".into());
        args.push(path.to_string_lossy().into_owned());
    }
    args.push("worker".into());

    let mut process = ProcessWorkerConfig::new(exe)
        .with_args(args)
        .with_kill_grace(config.kill_grace());
    if !config.rlimits.is_empty() {
        process = process.with_rlimits(config.rlimits.clone());
    }
    debug!(%process, "process workers configured");
    Ok(process)
}

fn requests(args: &BenchArgs) -> anyhow::Result<Vec<RunnerInput>> {
    if let Some(path) = &args.requests {
        let raw = fs::read_to_string(path).with_context(|| format!("reading requests {}", path.display()))?;
        return serde_json::from_str(&raw).with_context(|| format!("parsing requests {}", path.display()));
    }

    let args_info = args
        .args
        .iter()
        .map(|spec| parse_tensor(spec))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(args
        .artifacts
        .iter()
        .map(|path| RunnerInput::new(path.clone(), args.device.clone(), args_info.clone()))
        .collect())
}

/// `float32:128x128` -> tensor descriptor.
fn parse_tensor(spec: &str) -> anyhow::Result<ArgInfo> {
    let Some((dtype, shape)) = spec.split_once(':') else {
        bail!("argument {spec:?} must look like dtype:d0xd1");
    };
    if dtype.is_empty() {
        bail!("argument {spec:?} has no dtype");
    }
    let shape = if shape.is_empty() {
        Vec::new()
    } else {
        shape
            .split('x')
            .map(|d| d.parse::<u64>().with_context(|| format!("bad dimension {d:?} in {spec:?}")))
            .collect::<anyhow::Result<Vec<_>>>()?
    };
    Ok(ArgInfo::tensor(dtype, shape))
}
