use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::context::CliContext;
use crate::metrics;
use crate::server::{build_router, ServeState};

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Listen address (overrides `serve.host`)
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port (overrides `serve.port`)
    #[arg(long)]
    pub port: Option<u16>,

    /// Also watch for the memory-full banner while serving
    #[arg(long)]
    pub watch: bool,
}

pub async fn cmd_serve(args: ServeArgs, ctx: &CliContext) -> Result<()> {
    let mut serve = ctx.config().serve.clone();
    if let Some(host) = args.host {
        serve.host = host;
    }
    if let Some(port) = args.port {
        serve.port = port;
    }
    let addr = serve.addr()?;

    metrics::register_metrics();
    let harvester = ctx.harvester().await?;
    if args.watch && !harvester.start_watching() {
        warn!("watcher already running");
    }

    let state = ServeState::new(harvester.clone());
    state.health().mark_live();
    let router = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, dry_run = ctx.is_dry_run(), "message endpoint listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("serve loop failed")?;

    harvester.stop_watching();
    Ok(())
}
