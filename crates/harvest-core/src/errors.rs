//! Error types for the harvesting engine

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Locale;

/// Waiting points of the navigation and harvest pipeline.
///
/// Every timeout names the step it expired in so callers can tell
/// "the settings tab never showed up" apart from "the list never rendered".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitStep {
    SettingsTab,
    PanelActive,
    ManagementSection,
    ManageButton,
    ModalOpen,
    ListReady,
    Condition,
}

impl WaitStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitStep::SettingsTab => "settings-tab",
            WaitStep::PanelActive => "panel-active",
            WaitStep::ManagementSection => "management-section",
            WaitStep::ManageButton => "manage-button",
            WaitStep::ModalOpen => "modal-open",
            WaitStep::ListReady => "list-ready",
            WaitStep::Condition => "condition",
        }
    }
}

impl fmt::Display for WaitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a [`crate::host::HostPage`] implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
    pub retriable: bool,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retriable: false,
        }
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }
}

/// Coarse classification used by the message protocol and CLI exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    NotFound,
    EmptyResult,
    InvalidInput,
    UnsupportedLocation,
    Host,
    Settings,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::EmptyResult => "empty_result",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::UnsupportedLocation => "unsupported_location",
            ErrorKind::Host => "host",
            ErrorKind::Settings => "settings",
        }
    }
}

/// Errors surfaced by the harvesting engine
#[derive(Debug, Error, Clone)]
pub enum HarvestError {
    /// A bounded wait expired before its condition held
    #[error("timed out after {waited_ms}ms waiting for {step}")]
    Timeout { step: WaitStep, waited_ms: u64 },

    /// A required element or marker could not be resolved
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The list was located and scrolled but produced no records
    #[error("no saved memories were collected")]
    EmptyResult,

    /// A node handle did not resolve to an attached element
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The page is not one of the supported hosts
    #[error("unsupported location: {0}")]
    UnsupportedLocation(String),

    /// The host page failed to carry out an operation
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// The preference store could not be read or written
    #[error("settings error: {0}")]
    Settings(String),
}

impl HarvestError {
    pub fn timeout(step: WaitStep, waited: std::time::Duration) -> Self {
        HarvestError::Timeout {
            step,
            waited_ms: waited.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        HarvestError::NotFound { what: what.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::Timeout { .. } => ErrorKind::Timeout,
            HarvestError::NotFound { .. } => ErrorKind::NotFound,
            HarvestError::EmptyResult => ErrorKind::EmptyResult,
            HarvestError::InvalidInput(_) => ErrorKind::InvalidInput,
            HarvestError::UnsupportedLocation(_) => ErrorKind::UnsupportedLocation,
            HarvestError::Host(_) => ErrorKind::Host,
            HarvestError::Settings(_) => ErrorKind::Settings,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HarvestError::Timeout { .. })
    }

    /// Step the error expired in, when it is a timeout.
    pub fn step(&self) -> Option<WaitStep> {
        match self {
            HarvestError::Timeout { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Check if retrying the whole flow might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            HarvestError::Timeout { .. } => true,
            HarvestError::Host(err) => err.retriable,
            _ => false,
        }
    }

    /// Message shown on the prompt surface and returned over the message protocol.
    pub fn user_message(&self, locale: Locale) -> String {
        match (locale, self) {
            (Locale::ZhTw, HarvestError::Timeout { step, .. }) => {
                format!("等待逾時：{}", step_label_zh(*step))
            }
            (Locale::ZhTw, HarvestError::NotFound { what }) => format!("找不到：{what}"),
            (Locale::ZhTw, HarvestError::EmptyResult) => "未擷取到任何記憶".to_string(),
            (Locale::ZhTw, HarvestError::InvalidInput(detail)) => format!("無效的元素：{detail}"),
            (Locale::ZhTw, HarvestError::UnsupportedLocation(url)) => {
                format!("不支援的頁面：{url}")
            }
            (Locale::ZhTw, HarvestError::Host(err)) => format!("頁面操作失敗：{err}"),
            (Locale::ZhTw, HarvestError::Settings(detail)) => format!("設定讀取失敗：{detail}"),
            (Locale::En, HarvestError::Timeout { step, .. }) => {
                format!("Timed out waiting for {}", step_label_en(*step))
            }
            (Locale::En, HarvestError::EmptyResult) => "No saved memories were found".to_string(),
            (Locale::En, other) => {
                let mut text = other.to_string();
                if let Some(first) = text.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                text
            }
        }
    }
}

fn step_label_zh(step: WaitStep) -> &'static str {
    match step {
        WaitStep::SettingsTab => "個人化設定分頁",
        WaitStep::PanelActive => "個人化設定面板",
        WaitStep::ManagementSection => "記憶管理區塊",
        WaitStep::ManageButton => "管理按鈕",
        WaitStep::ModalOpen => "記憶列表視窗",
        WaitStep::ListReady => "記憶列表",
        WaitStep::Condition => "頁面狀態",
    }
}

fn step_label_en(step: WaitStep) -> &'static str {
    match step {
        WaitStep::SettingsTab => "the personalization tab",
        WaitStep::PanelActive => "the personalization panel",
        WaitStep::ManagementSection => "the memory management section",
        WaitStep::ManageButton => "the manage button",
        WaitStep::ModalOpen => "the saved memories dialog",
        WaitStep::ListReady => "the memory list",
        WaitStep::Condition => "the page",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeout_reports_step_and_kind() {
        let err = HarvestError::timeout(WaitStep::ManagementSection, Duration::from_millis(15_000));
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.step(), Some(WaitStep::ManagementSection));
        assert_eq!(
            err.to_string(),
            "timed out after 15000ms waiting for management-section"
        );
    }

    #[test]
    fn user_messages_follow_locale() {
        let err = HarvestError::EmptyResult;
        assert_eq!(err.user_message(Locale::ZhTw), "未擷取到任何記憶");
        assert_eq!(err.user_message(Locale::En), "No saved memories were found");

        let missing = HarvestError::not_found("capacity marker");
        assert_eq!(missing.user_message(Locale::En), "Not found: capacity marker");
    }

    #[test]
    fn host_errors_carry_retry_hint() {
        let err: HarvestError = HostError::new("socket closed").retriable(true).into();
        assert_eq!(err.kind(), ErrorKind::Host);
        assert!(err.is_retryable());
        assert!(!HarvestError::EmptyResult.is_retryable());
    }
}
