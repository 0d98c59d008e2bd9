use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use harvest_core::RunOutcome;
use serde_json::json;
use tokio::fs;
use tracing::info;

use super::context::CliContext;
use super::output::OutputFormat;
use crate::metrics;

#[derive(Args, Clone, Debug)]
pub struct ExportArgs {
    /// Also write the Markdown report to this file
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

pub async fn cmd_export(args: ExportArgs, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let locale = ctx.config().harvest.locale;
    let harvester = ctx.harvester().await?;

    let report = match harvester.main_flow().await {
        Ok(RunOutcome::Completed(report)) => {
            metrics::record_run("completed");
            report
        }
        Ok(RunOutcome::AlreadyRunning) => {
            metrics::record_run("busy");
            bail!("an export is already in progress");
        }
        Err(err) => {
            metrics::record_run(err.kind().as_str());
            let message = err.user_message(locale);
            return Err(anyhow::Error::new(err).context(message));
        }
    };

    let markdown = report.render(locale);
    if let Some(path) = &args.out {
        fs::write(path, &markdown)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    format.emit(
        &json!({
            "count": report.count(),
            "usage": report.usage().map(|usage| usage.to_string()),
            "items": report.items(),
            "markdown": &markdown,
        }),
        || markdown.clone(),
    )
}
