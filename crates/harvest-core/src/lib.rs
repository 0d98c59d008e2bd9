//! Memory harvesting engine.
//!
//! Detects the "memory full" banner, walks the host UI to the saved-memories
//! dialog, scrolls its virtualized list to collect every record, and renders
//! the result as a Markdown report.
//!
//! The engine talks to the page only through [`host::HostPage`]; all matching
//! runs over [`dom::DomSnapshot`] values so it can be tested without a browser.

pub mod adapter;
pub mod collector;
pub mod config;
pub mod dom;
pub mod errors;
pub mod facade;
pub mod guard;
pub mod host;
pub mod interaction;
pub mod locator;
pub mod navigator;
pub mod prompt;
pub mod protocol;
pub mod report;
pub mod settings;
pub mod trigger;
pub mod usage;
pub mod visibility;
pub mod waiting;

pub use adapter::{ChatGptAdapter, HostAdapter};
pub use config::{HarvestConfig, HostProfile, Locale};
pub use dom::{DomSnapshot, NodeId};
pub use errors::{ErrorKind, HarvestError, HostError, WaitStep};
pub use facade::{MemoryHarvester, RunOutcome, StatusSnapshot};
pub use host::{HostPage, InteractionEvent, MutationTick, PointerEventKind};
pub use report::Report;
pub use usage::UsagePercentage;
