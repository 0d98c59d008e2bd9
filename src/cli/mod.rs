//! `memharvest` command line.

pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod export;
pub mod output;
pub mod runtime;
pub mod serve;
pub mod status;
pub mod watch;

pub use app::run;
