use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, LoadedConfig};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug, cli.log_json)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_DATE"),
        "starting memharvest"
    );

    let LoadedConfig { config, path } = load_config(cli.config.as_ref()).await?;
    let ctx = CliContext::new(config, path, cli.dry_run, cli.demo_records);

    match dispatch(&cli, &ctx).await {
        Ok(()) => {
            info!("command completed");
            Ok(())
        }
        Err(err) => {
            error!("command failed: {err:#}");
            Err(err)
        }
    }
}
