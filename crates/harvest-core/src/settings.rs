//! Persisted user preferences.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::HarvestError;

/// Show the capacity prompt when the list fills up.
pub const AUTO_SHOW_PROMPT_KEY: &str = "autoShowModal";
/// RFC 3339 timestamp until which prompting is suppressed, or `"never"`.
pub const REMINDER_DISABLED_KEY: &str = "memoryFullReminderDisabled";
pub const REMINDER_NEVER: &str = "never";

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, HarvestError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), HarvestError>;
    async fn remove(&self, key: &str) -> Result<(), HarvestError>;
}

/// Process-local store.
#[derive(Default)]
pub struct InMemorySettings {
    values: RwLock<BTreeMap<String, Value>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettings {
    async fn get(&self, key: &str) -> Result<Option<Value>, HarvestError> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), HarvestError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), HarvestError> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten on every change.
pub struct JsonFileSettings {
    path: PathBuf,
    values: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileSettings {
    /// Open `path`, treating a missing file as empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let path = path.into();
        let values = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                HarvestError::Settings(format!("{}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(HarvestError::Settings(format!("{}: {err}", path.display())));
            }
        };
        debug!(path = %path.display(), keys = values.len(), "settings loaded");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<(), HarvestError> {
        let body = {
            let values = self.values.read();
            serde_json::to_string_pretty(&*values)
                .map_err(|err| HarvestError::Settings(err.to_string()))?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| HarvestError::Settings(format!("{}: {err}", parent.display())))?;
            }
        }
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|err| HarvestError::Settings(format!("{}: {err}", self.path.display())))
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettings {
    async fn get(&self, key: &str) -> Result<Option<Value>, HarvestError> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), HarvestError> {
        self.values.write().insert(key.to_string(), value);
        self.flush().await
    }

    async fn remove(&self, key: &str) -> Result<(), HarvestError> {
        let removed = self.values.write().remove(key).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(())
    }
}

/// Parsed form of the reminder suppression value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reminder {
    Active,
    SuppressedUntil(DateTime<Utc>),
    SuppressedForever,
}

/// Whether the capacity prompt may be shown at `now`.
///
/// A malformed suppression value is removed and blocks this prompt; an
/// expired one is removed and prompting resumes.
pub async fn reminder_allows(
    store: &dyn SettingsStore,
    now: DateTime<Utc>,
) -> Result<bool, HarvestError> {
    let Some(value) = store.get(REMINDER_DISABLED_KEY).await? else {
        return Ok(true);
    };
    let Some(raw) = value.as_str() else {
        info!(value = %value, "clearing malformed reminder setting");
        store.remove(REMINDER_DISABLED_KEY).await?;
        return Ok(false);
    };
    match parse_reminder(raw) {
        Some(Reminder::SuppressedForever) => Ok(false),
        Some(Reminder::SuppressedUntil(until)) if now < until => Ok(false),
        Some(Reminder::SuppressedUntil(_)) => {
            info!("reminder suppression expired");
            store.remove(REMINDER_DISABLED_KEY).await?;
            Ok(true)
        }
        Some(Reminder::Active) => Ok(true),
        None => {
            info!(raw, "clearing unparseable reminder setting");
            store.remove(REMINDER_DISABLED_KEY).await?;
            Ok(false)
        }
    }
}

fn parse_reminder(raw: &str) -> Option<Reminder> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(Reminder::Active);
    }
    if raw.eq_ignore_ascii_case(REMINDER_NEVER) {
        return Some(Reminder::SuppressedForever);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|until| Reminder::SuppressedUntil(until.with_timezone(&Utc)))
}

/// Suppress the capacity prompt until `until`, or forever with `None`.
pub async fn suppress_reminder(
    store: &dyn SettingsStore,
    until: Option<DateTime<Utc>>,
) -> Result<(), HarvestError> {
    let value = match until {
        Some(until) => Value::String(until.to_rfc3339()),
        None => Value::String(REMINDER_NEVER.to_string()),
    };
    store.set(REMINDER_DISABLED_KEY, value).await
}

/// The auto-show preference; defaults to on.
pub async fn auto_show_prompt(store: &dyn SettingsStore) -> Result<bool, HarvestError> {
    Ok(store
        .get(AUTO_SHOW_PROMPT_KEY)
        .await?
        .and_then(|value| value.as_bool())
        .unwrap_or(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn missing_value_allows_prompt() {
        let store = InMemorySettings::new();
        assert!(reminder_allows(&store, Utc::now()).await.unwrap());
        assert!(auto_show_prompt(&store).await.unwrap());
    }

    #[tokio::test]
    async fn non_string_value_is_removed_without_prompt() {
        let store = InMemorySettings::new();
        store.set(REMINDER_DISABLED_KEY, json!(12)).await.unwrap();
        assert!(!reminder_allows(&store, Utc::now()).await.unwrap());
        assert_eq!(store.get(REMINDER_DISABLED_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_value_is_removed_and_prompt_resumes() {
        let store = InMemorySettings::new();
        let now = Utc::now();
        suppress_reminder(&store, Some(now - Duration::hours(1)))
            .await
            .unwrap();
        assert!(reminder_allows(&store, now).await.unwrap());
        assert_eq!(store.get(REMINDER_DISABLED_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn future_and_never_values_suppress() {
        let store = InMemorySettings::new();
        let now = Utc::now();
        suppress_reminder(&store, Some(now + Duration::days(1)))
            .await
            .unwrap();
        assert!(!reminder_allows(&store, now).await.unwrap());

        suppress_reminder(&store, None).await.unwrap();
        assert!(!reminder_allows(&store, now).await.unwrap());
        assert!(store.get(REMINDER_DISABLED_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn json_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        {
            let store = JsonFileSettings::open(&path).await.unwrap();
            store.set(AUTO_SHOW_PROMPT_KEY, json!(false)).await.unwrap();
        }
        let reopened = JsonFileSettings::open(&path).await.unwrap();
        assert!(!auto_show_prompt(&reopened).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let err = JsonFileSettings::open(&path).await.err().expect("corrupt");
        assert!(matches!(err, HarvestError::Settings(_)));
    }
}
