use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::notify::{self, Endpoint};
use crate::relay::history::HISTORY_LIMIT;

/// Channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Delay before every reconnect attempt (constant, retried forever)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Where the external process lives
    #[serde(default = "default_endpoint")]
    pub endpoint: Endpoint,
}

fn default_reconnect_delay() -> u64 {
    5
}

/// Spawn this same binary in host mode, the way a browser launches a
/// native messaging host
fn default_endpoint() -> Endpoint {
    let program = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("claude-monitor"));
    Endpoint::Spawn {
        program,
        args: vec!["host".to_string()],
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay(),
            endpoint: default_endpoint(),
        }
    }
}

impl ChannelConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum number of notifications kept in history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// SQLite database holding history and unread count
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Socket serving UI collaborators
    #[serde(default = "notify::control_socket_path")]
    pub control_socket: PathBuf,
    /// Show desktop notifications (requires the `desktop-notifications` feature)
    #[serde(default = "default_desktop_notifications")]
    pub desktop_notifications: bool,
    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_limit() -> usize {
    HISTORY_LIMIT
}

fn default_store_path() -> PathBuf {
    notify::data_dir().join("state.db")
}

fn default_desktop_notifications() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            history_limit: default_history_limit(),
            store_path: default_store_path(),
            control_socket: notify::control_socket_path(),
            desktop_notifications: default_desktop_notifications(),
            channel: ChannelConfig::default(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み（存在しない場合はデフォルトを作成して保存）
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            if let Err(e) = config.save_to(&config_path) {
                tracing::warn!("Failed to save default config: {}", e);
            }
            Ok(config)
        }
    }

    /// Read a config file; missing fields take their defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        Ok(config)
    }

    /// 設定ファイルパスを取得
    pub fn config_path() -> Result<PathBuf> {
        // ~/.config/claude-monitor/config.toml を使用
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs.home_dir().join(".config/claude-monitor/config.toml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.channel.reconnect_delay(), Duration::from_secs(5));
        match config.channel.endpoint {
            Endpoint::Spawn { args, .. } => assert_eq!(args, vec!["host".to_string()]),
            other => panic!("unexpected endpoint: {:?}", other),
        }
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
history_limit = 20

[channel.endpoint]
kind = "socket"
path = "/run/user/1000/claude-monitor/channel.sock"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.channel.reconnect_delay_secs, 5);
        assert!(matches!(config.channel.endpoint, Endpoint::Socket { .. }));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = Config::default();
        config.channel.reconnect_delay_secs = 9;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.channel.reconnect_delay_secs, 9);
    }
}
