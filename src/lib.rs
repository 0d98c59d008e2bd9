//! Memory harvester application crate.
//!
//! Wires the engine from `harvest-core` to a live Chromium tab, and exposes it
//! through the `memharvest` CLI and an HTTP message endpoint.

pub mod browser;
pub mod cli;
pub mod config;
pub mod metrics;
pub mod server;

pub use browser::CdpHostPage;
pub use config::{AppConfig, ServeConfig};
pub use server::{build_router, ServeHealth, ServeState};
