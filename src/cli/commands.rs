use clap::Subcommand;

use super::config::ConfigArgs;
use super::export::ExportArgs;
use super::serve::ServeArgs;
use super::watch::WatchArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Open the saved-memories dialog and export every record
    Export(ExportArgs),

    /// Report whether the memory-full banner is showing
    Status,

    /// Watch the page until memory is full, then prompt or export
    Watch(WatchArgs),

    /// Accept protocol messages over HTTP
    Serve(ServeArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}
