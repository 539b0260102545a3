use tracing::info;

use rmeter_exec::WorkerMain;
use rmeter_observe::init_logger;

use crate::{config::AgentConfig, endpoint};

/// Body of the `worker` subcommand. Blocks until stdin closes.
pub fn run(config: &AgentConfig) -> anyhow::Result<()> {
    init_logger(&config.logger.for_worker())?;

    let slot = std::env::var("RMETER_WORKER_SLOT").unwrap_or_else(|_| "?".into());
    WorkerMain::new(endpoint::registry(config))
        .with_initializer(move || info!(%slot, "worker process initialized"))
        .serve()?;
    Ok(())
}
