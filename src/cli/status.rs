use anyhow::{anyhow, Result};

use super::context::CliContext;
use super::output::OutputFormat;

pub async fn cmd_status(ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let locale = ctx.config().harvest.locale;
    let harvester = ctx.harvester().await?;
    let status = harvester
        .check_status()
        .await
        .map_err(|err| anyhow!(err.user_message(locale)))?;

    format.emit(&status, || {
        format!(
            "memory full: {}\nlocation:    {}\nchecked at:  {}",
            if status.is_full { "yes" } else { "no" },
            status.location,
            status.timestamp.to_rfc3339(),
        )
    })
}
