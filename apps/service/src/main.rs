mod cli;
mod clock;
mod config;
mod context;
mod database;
mod digest;
mod monitoring;
mod notifications;
mod orchestrator;
mod pool;

#[cfg(test)]
mod testing;

use clap::Parser;
use tracing::debug;

use cli::Cli;
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    if config.scheduler.debug_retries {
        logger::init_with_directives(&["ipwatch::monitoring=debug"]);
    } else {
        logger::init();
    }
    debug!("configuration loaded");

    cli::dispatch(cli.command, config).await
}
