//! Global setting of the chart engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};

use thiserror::Error;

use super::utility::get_file_path;

/// Setting filename
pub const SETTING_FILENAME: &str = "chart_setting.json";

/// Default settings
fn default_settings() -> HashMap<String, SettingValue> {
    let mut settings = HashMap::new();

    // Log settings
    settings.insert("log.active".to_string(), SettingValue::Bool(true));
    settings.insert("log.level".to_string(), SettingValue::Int(20)); // INFO level
    settings.insert("log.console".to_string(), SettingValue::Bool(true));
    settings.insert("log.file".to_string(), SettingValue::Bool(false));

    // Datafeed settings
    settings.insert(
        "datafeed.url".to_string(),
        SettingValue::String("http://localhost:8000/api/v1".to_string()),
    );
    settings.insert("datafeed.token".to_string(), SettingValue::String(String::new()));
    settings.insert("datafeed.admin_resync".to_string(), SettingValue::Bool(false));
    settings.insert("datafeed.timeout_secs".to_string(), SettingValue::Int(30));

    // Session snapshot channel
    settings.insert(
        "snapshot.url".to_string(),
        SettingValue::String("ws://localhost:8000/socket.io/?EIO=4&transport=websocket".to_string()),
    );
    settings.insert("snapshot.session_id".to_string(), SettingValue::String(String::new()));

    // Live updater
    settings.insert("live.poll_interval_ms".to_string(), SettingValue::Int(5_000));
    settings.insert("live.use_snapshot_ticks".to_string(), SettingValue::Bool(true));

    // History pager
    settings.insert("history.trigger_bars".to_string(), SettingValue::Int(10));
    for (code, days) in [
        ("1m", 5),
        ("3m", 10),
        ("5m", 15),
        ("10m", 20),
        ("15m", 30),
        ("30m", 60),
        ("1h", 90),
        ("1d", 365),
    ] {
        settings.insert(format!("history.lookback_days.{}", code), SettingValue::Int(days));
    }

    // Replay
    settings.insert("replay.base_interval_ms".to_string(), SettingValue::Int(1_000));
    settings.insert("replay.floor_ms".to_string(), SettingValue::Int(50));

    settings
}

/// Errors raised while persisting settings
#[derive(Debug, Error)]
pub enum SettingError {
    #[error("settings are not backed by a file")]
    NoFile,

    #[error("failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Setting value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl SettingValue {
    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64
    pub fn as_float(&self) -> Option<f64> {
        match self {
            SettingValue::Float(f) => Some(*f),
            SettingValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Key-value settings container, optionally backed by a JSON file
pub struct Settings {
    settings: RwLock<HashMap<String, SettingValue>>,
    path: Option<PathBuf>,
}

impl Settings {
    /// Create new Settings with defaults merged with the trader directory file
    pub fn new() -> Self {
        Self::load_from(get_file_path(SETTING_FILENAME))
    }

    /// Defaults merged with the given JSON file, saved back to the same file
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut settings = default_settings();

        if let Some(file_settings) = load_settings_from_file(&path) {
            settings.extend(file_settings);
        }

        Self {
            settings: RwLock::new(settings),
            path: Some(path),
        }
    }

    /// Empty settings living only as long as this value.
    ///
    /// Used for per-session chart preferences that must not outlive the process.
    pub fn in_memory() -> Self {
        Self {
            settings: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Get a setting value
    pub fn get(&self, key: &str) -> Option<SettingValue> {
        self.settings.read().ok()?.get(key).cloned()
    }

    /// Get a string setting
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    /// Get an integer setting
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_int())
    }

    /// Get a float setting
    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_float())
    }

    /// Get a bool setting
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// Set a setting value
    pub fn set(&self, key: impl Into<String>, value: SettingValue) {
        if let Ok(mut settings) = self.settings.write() {
            settings.insert(key.into(), value);
        }
    }

    /// Remove a setting, returning its previous value
    pub fn remove(&self, key: &str) -> Option<SettingValue> {
        self.settings.write().ok()?.remove(key)
    }

    /// Update settings from a map
    pub fn update(&self, new_settings: HashMap<String, SettingValue>) {
        if let Ok(mut settings) = self.settings.write() {
            settings.extend(new_settings);
        }
    }

    /// Get all settings as HashMap
    pub fn get_all(&self) -> HashMap<String, SettingValue> {
        self.settings
            .read()
            .map(|settings| settings.clone())
            .unwrap_or_default()
    }

    /// Save settings to the backing file
    pub fn save(&self) -> Result<(), SettingError> {
        let path = self.path.as_ref().ok_or(SettingError::NoFile)?;
        let json = serde_json::to_string_pretty(&self.get_all())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

/// Load settings from JSON file
fn load_settings_from_file(path: &Path) -> Option<HashMap<String, SettingValue>> {
    if path.exists() {
        let content = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!("ignoring unreadable settings file {}: {}", path.display(), e);
                None
            }
        }
    } else {
        None
    }
}

/// Global settings instance
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::new);
