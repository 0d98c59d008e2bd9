use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use super::context::CliContext;
use super::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct WatchArgs {
    /// Export as soon as memory is full instead of prompting
    #[arg(long)]
    pub auto_export: bool,
}

pub async fn cmd_watch(args: WatchArgs, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let harvester = if args.auto_export {
        ctx.harvester_with(|config| config.watch.auto_harvest = true)
            .await?
    } else {
        ctx.harvester().await?
    };

    let mut updates = harvester.subscribe_status();
    if !harvester.start_watching() {
        bail!("a watcher is already running");
    }
    info!(
        auto_export = args.auto_export,
        "watching for the memory-full banner; press Ctrl-C to stop"
    );

    let mut ticker = interval(Duration::from_millis(250));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_full = None;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("stopping watcher");
                harvester.stop_watching();
                break;
            }
            update = updates.recv() => match update {
                Ok(status) => {
                    if last_full != Some(status.is_full) {
                        last_full = Some(status.is_full);
                        info!(is_full = status.is_full, location = %status.location, "status changed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "status updates lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                if !harvester.is_watching() && !harvester.is_running() {
                    break;
                }
            }
        }
    }

    if let Some(markdown) = harvester.last_markdown() {
        let report = harvester.last_report();
        format.emit(
            &serde_json::json!({
                "count": report.as_ref().map(|report| report.count()),
                "markdown": &markdown,
            }),
            || markdown.clone(),
        )?;
    } else if harvester.is_prompt_showing() {
        println!("Memory is full. Run `memharvest export` to save the list.");
    }
    Ok(())
}
