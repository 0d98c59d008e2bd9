use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio::fs;

use super::context::CliContext;
use super::output::OutputFormat;
use crate::config::AppConfig;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Check that the configuration file parses
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let path = ctx.config_path();
    match args.action {
        ConfigAction::Show => {
            let config = ctx.config();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
                _ => print!("{}", serde_yaml::to_string(config)?),
            }
        }
        ConfigAction::Path => {
            let exists = fs::try_exists(path).await.unwrap_or(false);
            println!(
                "{}{}",
                path.display(),
                if exists { "" } else { " (not found, using defaults)" }
            );
        }
        ConfigAction::Validate => {
            if fs::try_exists(path).await? {
                let raw = fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_yaml::from_str::<AppConfig>(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?;
                println!("Configuration file {} is valid", path.display());
            } else {
                println!(
                    "No configuration file at {}; defaults are valid",
                    path.display()
                );
            }
        }
    }
    Ok(())
}
