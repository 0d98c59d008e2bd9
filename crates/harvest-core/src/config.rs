//! Tunables for navigation, scrolling and watching.
//!
//! Every section deserializes with defaults so a config file only has to
//! name the values it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Language used for report labels and user-facing messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "zh-TW", alias = "zh_tw", alias = "zh")]
    ZhTw,
    #[serde(rename = "en", alias = "en-US")]
    En,
}

impl Locale {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "zh-tw" | "zh_tw" | "zh" => Some(Locale::ZhTw),
            "en" | "en-us" => Some(Locale::En),
            _ => None,
        }
    }
}

/// Everything the engine needs to know about the host page's markup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostProfile {
    pub supported_domains: Vec<String>,
    pub settings_url: String,
    pub settings_fragment: String,
    pub settings_tab_test_id: String,
    pub trigger_phrases: Vec<String>,
    pub management_keywords: Vec<String>,
    pub modal_title_keywords: Vec<String>,
    pub manage_labels: Vec<String>,
    pub default_title: String,
}

impl Default for HostProfile {
    fn default() -> Self {
        Self {
            supported_domains: vec!["chatgpt.com".into(), "chat.openai.com".into()],
            settings_url: "https://chatgpt.com/#settings/Personalization".into(),
            settings_fragment: "#settings/Personalization".into(),
            settings_tab_test_id: "personalization-tab".into(),
            trigger_phrases: vec![
                "儲存的記憶已滿".into(),
                "Memory storage is full".into(),
                "Memory is full".into(),
            ],
            management_keywords: vec![
                "管理記憶".into(),
                "Manage memory".into(),
                "Memory".into(),
                "記憶".into(),
            ],
            modal_title_keywords: vec![
                "儲存的記憶".into(),
                "Saved memories".into(),
                "Memories".into(),
                "記憶列表".into(),
            ],
            manage_labels: vec!["管理".into(), "Manage".into()],
            default_title: "Saved memories".into(),
        }
    }
}

/// Per-step wait budgets in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationTimeouts {
    pub settings_tab_ms: u64,
    pub panel_ms: u64,
    pub management_ms: u64,
    pub manage_button_ms: u64,
    pub modal_ms: u64,
    pub list_ready_ms: u64,
}

impl Default for NavigationTimeouts {
    fn default() -> Self {
        Self {
            settings_tab_ms: 15_000,
            panel_ms: 10_000,
            management_ms: 15_000,
            manage_button_ms: 8_000,
            modal_ms: 20_000,
            list_ready_ms: 12_000,
        }
    }
}

impl NavigationTimeouts {
    pub fn settings_tab(&self) -> Duration {
        Duration::from_millis(self.settings_tab_ms)
    }

    pub fn panel(&self) -> Duration {
        Duration::from_millis(self.panel_ms)
    }

    pub fn management(&self) -> Duration {
        Duration::from_millis(self.management_ms)
    }

    pub fn manage_button(&self) -> Duration {
        Duration::from_millis(self.manage_button_ms)
    }

    pub fn modal(&self) -> Duration {
        Duration::from_millis(self.modal_ms)
    }

    pub fn list_ready(&self) -> Duration {
        Duration::from_millis(self.list_ready_ms)
    }
}

/// Scroll harvester tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollTuning {
    /// Fraction of the visible height advanced per step.
    pub step_ratio: f64,
    /// Consecutive rounds without new records before stopping at the bottom.
    pub idle_rounds: u32,
    /// Extra idle rounds tolerated when the bottom is never reached.
    pub idle_grace_rounds: u32,
    pub settle_ms: u64,
    pub end_bounce_ms: u64,
    pub max_scan_ms: u64,
    pub bottom_epsilon_px: f64,
    pub min_record_chars: usize,
}

impl Default for ScrollTuning {
    fn default() -> Self {
        Self {
            step_ratio: 0.6,
            idle_rounds: 8,
            idle_grace_rounds: 4,
            settle_ms: 70,
            end_bounce_ms: 140,
            max_scan_ms: 40_000,
            bottom_epsilon_px: 2.0,
            min_record_chars: 10,
        }
    }
}

impl ScrollTuning {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn end_bounce(&self) -> Duration {
        Duration::from_millis(self.end_bounce_ms)
    }

    pub fn max_scan(&self) -> Duration {
        Duration::from_millis(self.max_scan_ms)
    }
}

/// Synthetic click tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionTuning {
    pub click_settle_ms: u64,
    pub edge_margin_px: f64,
}

impl Default for InteractionTuning {
    fn default() -> Self {
        Self {
            click_settle_ms: 100,
            edge_margin_px: 2.0,
        }
    }
}

impl InteractionTuning {
    pub fn click_settle(&self) -> Duration {
        Duration::from_millis(self.click_settle_ms)
    }
}

/// Capacity watcher tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchTuning {
    /// Fallback poll interval when the mutation feed is quiet.
    pub poll_interval_ms: u64,
    /// Delay before an error state on the prompt surface returns to idle.
    pub prompt_revert_ms: u64,
    /// Harvest immediately instead of prompting when capacity is reached.
    pub auto_harvest: bool,
}

impl Default for WatchTuning {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            prompt_revert_ms: 2_000,
            auto_harvest: false,
        }
    }
}

impl WatchTuning {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn prompt_revert(&self) -> Duration {
        Duration::from_millis(self.prompt_revert_ms)
    }
}

/// Root configuration of the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub locale: Locale,
    /// Abort with `NotFound` when no capacity marker is visible.
    pub require_trigger: bool,
    pub profile: HostProfile,
    pub timeouts: NavigationTimeouts,
    pub scroll: ScrollTuning,
    pub interaction: InteractionTuning,
    pub watch: WatchTuning,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            locale: Locale::default(),
            require_trigger: true,
            profile: HostProfile::default(),
            timeouts: NavigationTimeouts::default(),
            scroll: ScrollTuning::default(),
            interaction: InteractionTuning::default(),
            watch: WatchTuning::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_sections_keep_defaults() {
        let cfg: HarvestConfig = serde_json::from_value(serde_json::json!({
            "locale": "en",
            "scroll": { "idle_rounds": 3 },
            "timeouts": { "modal_ms": 500 }
        }))
        .expect("parse config");

        assert_eq!(cfg.locale, Locale::En);
        assert_eq!(cfg.scroll.idle_rounds, 3);
        assert_eq!(cfg.scroll.step_ratio, 0.6);
        assert_eq!(cfg.timeouts.modal(), Duration::from_millis(500));
        assert_eq!(cfg.timeouts.management_ms, 15_000);
        assert!(cfg.require_trigger);
    }

    #[test]
    fn locale_parse_accepts_common_spellings() {
        assert_eq!(Locale::parse("zh-TW"), Some(Locale::ZhTw));
        assert_eq!(Locale::parse("EN"), Some(Locale::En));
        assert_eq!(Locale::parse("fr"), None);
    }
}
