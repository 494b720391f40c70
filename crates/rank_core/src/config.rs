//! Rank behaviour settings.
//!
//! These sections are embedded in the server's TOML file (`[groups]`,
//! `[display]`, `[messages]`). Every field has a default so a partial file
//! still loads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_group_name() -> String {
    "Default".to_string()
}

fn default_group_prefix() -> String {
    "&7".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tablist_format() -> String {
    "%group_prefix% &r%player%".to_string()
}

fn default_sidebar_title() -> String {
    "&ePlayer Info".to_string()
}

fn default_sidebar_lines() -> Vec<String> {
    vec![
        "&7Group: %group_prefix%".to_string(),
        "&7Expires: &f%expiry_time%".to_string(),
        "&7Online: &f%online_players%".to_string(),
    ]
}

fn default_sign_identifier() -> String {
    "[GroupInfo]".to_string()
}

fn default_sign_lines() -> [String; 4] {
    [
        "&1[GroupInfo]".to_string(),
        "&0%player%".to_string(),
        "%group_prefix%".to_string(),
        "&7%expiry_time%".to_string(),
    ]
}

fn default_message_prefix() -> String {
    "&8[&6Ranks&8] &r".to_string()
}

fn default_updated_player() -> String {
    "&aYour group has been set to &e%group%&a.".to_string()
}

fn default_updated_player_temp() -> String {
    "&aYour group has been set to &e%group%&a for &e%time%&a.".to_string()
}

fn default_expired_notice() -> String {
    "&cYour temporary group has expired. You are now in the default group.".to_string()
}

/// All settings the rank components consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankSettings {
    #[serde(default)]
    pub groups: GroupSettings,
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub messages: MessageSettings,
}

/// Default group and per-group permission nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSettings {
    /// Group every player falls back to. Always exists, cannot be deleted.
    #[serde(default = "default_group_name")]
    pub default_group: String,
    /// Prefix used when the default group has to be created.
    #[serde(default = "default_group_prefix")]
    pub default_prefix: String,
    /// Permission nodes granted per group name (matched ignoring case).
    #[serde(default)]
    pub permissions: HashMap<String, Vec<String>>,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            default_group: default_group_name(),
            default_prefix: default_group_prefix(),
            permissions: HashMap::new(),
        }
    }
}

/// Tab list, sidebar and info sign templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(default = "default_true")]
    pub tablist_enabled: bool,
    #[serde(default = "default_tablist_format")]
    pub tablist_format: String,
    #[serde(default = "default_true")]
    pub sidebar_enabled: bool,
    #[serde(default = "default_sidebar_title")]
    pub sidebar_title: String,
    #[serde(default = "default_sidebar_lines")]
    pub sidebar_lines: Vec<String>,
    #[serde(default = "default_true")]
    pub signs_enabled: bool,
    /// First line a placed sign must carry to become an info sign.
    #[serde(default = "default_sign_identifier")]
    pub sign_identifier: String,
    #[serde(default = "default_sign_lines")]
    pub sign_lines: [String; 4],
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            tablist_enabled: true,
            tablist_format: default_tablist_format(),
            sidebar_enabled: true,
            sidebar_title: default_sidebar_title(),
            sidebar_lines: default_sidebar_lines(),
            signs_enabled: true,
            sign_identifier: default_sign_identifier(),
            sign_lines: default_sign_lines(),
        }
    }
}

/// Notices sent to players. `%group%` and `%time%` are substituted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSettings {
    #[serde(default = "default_message_prefix")]
    pub prefix: String,
    #[serde(default = "default_updated_player")]
    pub updated_player: String,
    #[serde(default = "default_updated_player_temp")]
    pub updated_player_temp: String,
    #[serde(default = "default_expired_notice")]
    pub expired_notice: String,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            prefix: default_message_prefix(),
            updated_player: default_updated_player(),
            updated_player_temp: default_updated_player_temp(),
            expired_notice: default_expired_notice(),
        }
    }
}
