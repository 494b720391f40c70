//! Configuration management for the rank server.
//!
//! Loads the TOML configuration file, creating one with defaults when it is
//! missing, and validates the merged settings before startup.

use rank_core::{DisplaySettings, GroupSettings, MessageSettings, RankSettings, TimerSettings};
use rank_storage::DatabaseSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

fn default_tick_interval() -> u64 {
    50
}

fn default_sweep_interval() -> u64 {
    5_000
}

fn default_sign_refresh_interval() -> u64 {
    100_000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub groups: GroupSettings,
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub messages: MessageSettings,
}

/// Timer cadence of the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// How often the main context wakes up without queued work
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Interval between expiry sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    /// Interval between full info sign refreshes (0 to disable)
    #[serde(default = "default_sign_refresh_interval")]
    pub sign_refresh_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            sweep_interval_ms: default_sweep_interval(),
            sign_refresh_interval_ms: default_sign_refresh_interval(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("📝 Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// The settings consumed by the rank components.
    pub fn rank_settings(&self) -> RankSettings {
        RankSettings {
            groups: self.groups.clone(),
            display: self.display.clone(),
            messages: self.messages.clone(),
        }
    }

    /// Background timer cadence. The sign refresh only runs when signs are
    /// enabled and its interval is non-zero.
    pub fn timer_settings(&self) -> TimerSettings {
        let refresh = self.server.sign_refresh_interval_ms;
        TimerSettings {
            sweep_interval: Duration::from_millis(self.server.sweep_interval_ms),
            sign_refresh_interval: (self.display.signs_enabled && refresh > 0)
                .then(|| Duration::from_millis(refresh)),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.server.tick_interval_ms)
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.tick_interval_ms == 0 {
            return Err("server.tick_interval_ms must be greater than 0".to_string());
        }
        if self.server.sweep_interval_ms == 0 {
            return Err("server.sweep_interval_ms must be greater than 0".to_string());
        }

        if self.database.pool_size == 0 {
            return Err("database.pool_size must be greater than 0".to_string());
        }
        if self.database.sqlite_path.trim().is_empty() {
            return Err("database.sqlite_path cannot be empty".to_string());
        }

        if self.groups.default_group.trim().is_empty() {
            return Err("groups.default_group cannot be empty".to_string());
        }
        if self.groups.default_group.chars().count() > 64 {
            return Err(format!(
                "groups.default_group '{}' is longer than 64 characters",
                self.groups.default_group
            ));
        }

        if self.display.signs_enabled && self.display.sign_identifier.trim().is_empty() {
            return Err("display.sign_identifier cannot be empty while signs are enabled".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.tick_interval_ms, 50);
        assert_eq!(config.server.sweep_interval_ms, 5_000);
        assert_eq!(config.database.backend, "sqlite");
        assert_eq!(config.groups.default_group, "Default");
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ranks.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.sign_refresh_interval_ms, 100_000);
        assert!(path.exists());

        // The written file loads back to the same values.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.display.sign_lines, config.display.sign_lines);
        assert_eq!(reloaded.messages.prefix, config.messages.prefix);
    }

    #[tokio::test]
    async fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ranks.toml");
        let toml_content = r#"
[server]
sweep_interval_ms = 1000

[database]
backend = "mysql"

[database.mysql]
host = "db.internal"
password = "secret"

[groups]
default_group = "Guest"

[groups.permissions]
admin = ["server.kick", "server.ban"]

[display]
sidebar_enabled = false
"#;
        tokio::fs::write(&path, toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.sweep_interval_ms, 1000);
        assert_eq!(config.server.tick_interval_ms, 50);
        assert_eq!(config.database.backend, "mysql");
        assert_eq!(config.database.mysql.host, "db.internal");
        assert_eq!(config.database.mysql.port, 3306);
        assert_eq!(config.groups.default_group, "Guest");
        assert_eq!(config.groups.permissions["admin"].len(), 2);
        assert!(!config.display.sidebar_enabled);
        assert!(config.display.tablist_enabled);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ranks.toml");
        tokio::fs::write(&path, "[server\nsweep = ").await.unwrap();
        assert!(AppConfig::load_from_file(&path).await.is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.server.sweep_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.groups.default_group = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.display.sign_identifier = String::new();
        assert!(config.validate().is_err());
        config.display.signs_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sign_refresh_follows_display_toggle() {
        let mut config = AppConfig::default();
        assert_eq!(
            config.timer_settings().sign_refresh_interval,
            Some(Duration::from_secs(100))
        );

        config.display.signs_enabled = false;
        assert_eq!(config.timer_settings().sign_refresh_interval, None);

        config.display.signs_enabled = true;
        config.server.sign_refresh_interval_ms = 0;
        assert_eq!(config.timer_settings().sign_refresh_interval, None);
        assert_eq!(config.timer_settings().sweep_interval, Duration::from_secs(5));
    }
}
