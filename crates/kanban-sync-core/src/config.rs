use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{SyncError, SyncResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub view: ViewSettings,
}

fn default_broker_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_heartbeat_ms() -> u64 {
    4000
}

fn default_poll_interval_ms() -> u64 {
    1800
}

fn default_subscriber_buffer() -> usize {
    256
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            subscriber_buffer: default_subscriber_buffer(),
            cache: CacheSettings::default(),
            view: ViewSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_capacity() -> usize {
    128
}

fn default_cache_ttl_secs() -> u64 {
    600
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Board,
    List,
    Calendar,
}

/// Per-user presentation preferences, handed to whichever component renders the board.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSettings {
    #[serde(default)]
    pub mode: ViewMode,
    #[serde(default)]
    pub collapsed_panels: BTreeSet<String>,
    #[serde(default)]
    pub show_archived: bool,
}

impl ViewSettings {
    pub fn is_collapsed(&self, panel: &str) -> bool {
        self.collapsed_panels.contains(panel)
    }

    pub fn toggle_panel(&mut self, panel: &str) {
        if !self.collapsed_panels.remove(panel) {
            self.collapsed_panels.insert(panel.to_string());
        }
    }
}

impl SyncConfig {
    pub fn config_path() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            dirs::home_dir().map(|home| home.join(".config/kanban-sync/config.toml"))
        }
        #[cfg(target_os = "linux")]
        {
            dirs::config_dir().map(|config| config.join("kanban-sync/config.toml"))
        }
        #[cfg(target_os = "windows")]
        {
            dirs::config_dir().map(|config| config.join("kanban-sync\\config.toml"))
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }

    pub fn load() -> Self {
        if let Some(config_path) = Self::config_path() {
            if config_path.exists() {
                if let Ok(config) = Self::load_from(&config_path) {
                    return config;
                }
            }
        }
        Self::default()
    }

    pub fn load_from(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_timings() {
        let config = SyncConfig::default();
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.heartbeat(), Duration::from_secs(4));
        assert_eq!(config.poll_interval(), Duration::from_millis(1800));
        assert_eq!(config.view.mode, ViewMode::Board);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
reconnect_delay_ms = 250

[view]
mode = "calendar"
collapsed_panels = ["activity"]
"#,
        )
        .unwrap();

        let config = SyncConfig::load_from(&path).unwrap();
        assert_eq!(config.reconnect_delay_ms, 250);
        assert_eq!(config.poll_interval_ms, 1800);
        assert_eq!(config.view.mode, ViewMode::Calendar);
        assert!(config.view.is_collapsed("activity"));
        assert_eq!(config.cache, CacheSettings::default());
    }

    #[test]
    fn test_load_invalid_file_is_serialization_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "reconnect_delay_ms = \"soon\"").unwrap();

        let err = SyncConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, SyncError::Serialization(_)));
    }

    #[test]
    fn test_toggle_panel() {
        let mut view = ViewSettings::default();
        view.toggle_panel("sprint");
        assert!(view.is_collapsed("sprint"));
        view.toggle_panel("sprint");
        assert!(!view.is_collapsed("sprint"));
    }
}
