//! Application configuration.
//!
//! One YAML document with a section per concern. Every section falls back to
//! its defaults, and a handful of `MEMHARVEST_*` variables override the file.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use cdp_adapter::CdpConfig;
use harvest_core::{HarvestConfig, Locale};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8791,
        }
    }
}

impl ServeConfig {
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse()
            .map_err(|err| anyhow::anyhow!("invalid serve address {raw}: {err}"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub harvest: HarvestConfig,
    pub browser: CdpConfig,
    /// Page opened when no supported tab is already open.
    pub start_url: String,
    /// JSON file backing the reminder and prompt settings.
    pub settings_path: Option<PathBuf>,
    pub serve: ServeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            harvest: HarvestConfig::default(),
            browser: CdpConfig::default(),
            start_url: "https://chatgpt.com/".into(),
            settings_path: None,
            serve: ServeConfig::default(),
        }
    }
}

impl AppConfig {
    /// Settings file, defaulting to the user's config directory.
    pub fn resolved_settings_path(&self) -> PathBuf {
        if let Some(path) = &self.settings_path {
            return path.clone();
        }
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("memharvest");
        path.push("settings.json");
        path
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(flag) = env_bool("MEMHARVEST_HEADLESS") {
            self.browser.headless = flag;
        }
        if let Some(url) = env_string("MEMHARVEST_WS_URL") {
            info!(url = %url, "attaching to browser from MEMHARVEST_WS_URL");
            self.browser.websocket_url = Some(url);
        }
        if let Some(path) = env_string("MEMHARVEST_CHROME") {
            self.browser.executable = path.into();
        }
        if let Some(path) = env_string("MEMHARVEST_SETTINGS") {
            self.settings_path = Some(path.into());
        }
        if let Some(raw) = env_string("MEMHARVEST_LOCALE") {
            match Locale::parse(&raw) {
                Some(locale) => self.harvest.locale = locale,
                None => warn!(value = %raw, "ignoring unknown MEMHARVEST_LOCALE"),
            }
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    match env_string(name)?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
