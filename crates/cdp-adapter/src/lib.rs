//! Chromium DevTools Protocol adapter for the memory harvester.
//!
//! Launches (or attaches to) a Chromium instance, correlates commands with
//! responses over one websocket, and republishes the page events the
//! harvester cares about on a broadcast bus.

use std::{env, path::PathBuf};

use tokio::sync::broadcast;
use which::which;

pub mod ids {
    use std::fmt;

    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Adapter-local handle for an attached page target.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for PageId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl fmt::Display for PageId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "page-{}", self.0.simple())
        }
    }
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum AdapterErrorKind {
        #[error("command timed out")]
        CommandTimeout,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("browser launch failed")]
        Launch,
        #[error("page target not found")]
        TargetNotFound,
        #[error("script raised an exception")]
        ScriptException,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to callers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }

        pub(crate) fn decode(err: serde_json::Error) -> Self {
            Self::new(AdapterErrorKind::Internal).with_hint(format!("malformed cdp payload: {err}"))
        }
    }
}

pub mod events {
    use super::ids::PageId;
    use serde::{Deserialize, Serialize};

    /// Page events republished by the adapter.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub enum RawEvent {
        /// A page script called a binding installed with `Runtime.addBinding`.
        BindingCalled {
            page: PageId,
            name: String,
            payload: String,
        },
        /// The main frame committed a navigation.
        PageNavigated { page: PageId, url: String },
        /// Same-document navigation, e.g. a fragment change.
        NavigatedWithinDocument { page: PageId, url: String },
        PageLoaded { page: PageId },
        PageClosed { page: PageId },
        Error {
            page: Option<PageId>,
            message: String,
        },
    }

    impl RawEvent {
        pub fn page(&self) -> Option<PageId> {
            match self {
                RawEvent::BindingCalled { page, .. }
                | RawEvent::PageNavigated { page, .. }
                | RawEvent::NavigatedWithinDocument { page, .. }
                | RawEvent::PageLoaded { page }
                | RawEvent::PageClosed { page } => Some(*page),
                RawEvent::Error { page, .. } => *page,
            }
        }
    }
}

pub mod config {
    use crate::detect_chrome_executable;
    use serde::{Deserialize, Serialize};
    use std::{
        env,
        path::{Path, PathBuf},
    };

    /// Configuration for launching and tuning the adapter.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub executable: PathBuf,
        /// Profile directory; reuse one that is already signed in.
        pub user_data_dir: PathBuf,
        pub headless: bool,
        pub default_deadline_ms: u64,
        pub retry_backoff_ms: u64,
        /// Attach to a running browser instead of launching one.
        pub websocket_url: Option<String>,
        pub heartbeat_interval_ms: u64,
        pub extra_args: Vec<String>,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                executable: default_chrome_path(),
                user_data_dir: default_profile_dir(),
                headless: resolve_headless_default(),
                default_deadline_ms: 30_000,
                retry_backoff_ms: 250,
                websocket_url: None,
                heartbeat_interval_ms: 15_000,
                extra_args: Vec::new(),
            }
        }
    }

    pub(crate) fn env_flag(name: &str) -> Option<bool> {
        let value = env::var(name).ok()?;
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    // Headful unless MEMHARVEST_HEADLESS says otherwise: the profile has to
    // be signed in, which usually happens by hand.
    fn resolve_headless_default() -> bool {
        env_flag("MEMHARVEST_HEADLESS").unwrap_or(false)
    }

    fn default_chrome_path() -> PathBuf {
        detect_chrome_executable().unwrap_or_default()
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(path) = env::var("MEMHARVEST_CHROME_PROFILE") {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        Path::new("./.memharvest-profile").into()
    }
}

fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("MEMHARVEST_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    let skip_defaults = env::var("MEMHARVEST_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if skip_defaults {
        return None;
    }

    os_specific_chrome_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
            .iter()
            .filter_map(|key| env::var(key).ok())
            .filter(|root| !root.trim().is_empty())
            .flat_map(|root| {
                let root = PathBuf::from(root.trim());
                [
                    root.join("Google/Chrome/Application/chrome.exe"),
                    root.join("Chromium/Application/chrome.exe"),
                ]
            })
            .collect()
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}

pub mod adapter;
pub mod metrics;
pub mod registry;
pub mod transport;
pub mod util;

pub use adapter::{CdpAdapter, EventBus};
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use events::RawEvent;
pub use ids::PageId;

/// Create the broadcast bus the adapter publishes on.
pub fn event_bus(buffer: usize) -> (EventBus, broadcast::Receiver<RawEvent>) {
    broadcast::channel(buffer)
}
