use anyhow::Result;

use super::config::cmd_config;
use super::env::CliArgs;
use super::export::cmd_export;
use super::serve::cmd_serve;
use super::status::cmd_status;
use super::watch::cmd_watch;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Export(args) => cmd_export(args, ctx, cli.output).await,
        Commands::Status => cmd_status(ctx, cli.output).await,
        Commands::Watch(args) => cmd_watch(args, ctx, cli.output).await,
        Commands::Serve(args) => cmd_serve(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx, cli.output).await,
    }
}
