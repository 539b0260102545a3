mod args;
mod bench;
mod config;
mod endpoint;
mod worker;

use clap::Parser;
use tracing::info;

use rmeter_observe::{init_local_offset, init_logger};

use crate::{
    args::{Cli, Command},
    config::AgentConfig,
};

fn main() -> anyhow::Result<()> {
    // before any thread exists
    init_local_offset();

    let cli = Cli::parse();
    let mut config = AgentConfig::load(cli.config.as_deref())?;
    cli.logging.apply(&mut config.logger);

    match cli.command {
        Command::Worker => worker::run(&config),
        Command::Bench(args) => {
            args.apply(&mut config);
            init_logger(&config.logger)?;
            info!(isolation = ?config.isolation, workers = config.max_workers, "logger initialized");

            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(bench::run(config, args, cli.config))
        }
    }
}
