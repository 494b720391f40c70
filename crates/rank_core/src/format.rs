//! Placeholder expansion for tab-list names, sidebars, signs and notices.
//!
//! Supported placeholders: `%player%`, `%group_name%`, `%rank%`,
//! `%group_prefix%`, `%expiry_time%` and `%online_players%`. Values are
//! substituted first and `&` colour codes rendered afterwards, so a prefix's
//! codes survive substitution.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{DisplaySettings, MessageSettings, RankSettings};
use crate::duration::format_duration;
use crate::effects::{SessionEffects, Sidebar};
use crate::markup;
use crate::types::{Assignment, GroupDefinition, GroupKey};

/// How the expiry of an assignment is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDisplay {
    Permanent,
    Remaining(Duration),
    Expired,
    /// The tracked player is not connected.
    Offline,
}

impl ExpiryDisplay {
    pub fn of(assignment: Option<&Assignment>, now: DateTime<Utc>) -> Self {
        match assignment {
            Some(assignment) if assignment.expires_at.is_some() => assignment
                .remaining(now)
                .map(ExpiryDisplay::Remaining)
                .unwrap_or(ExpiryDisplay::Expired),
            _ => ExpiryDisplay::Permanent,
        }
    }

    pub fn text(&self) -> String {
        match self {
            ExpiryDisplay::Permanent => "Permanent".to_string(),
            ExpiryDisplay::Remaining(left) => format_duration(*left),
            ExpiryDisplay::Expired => "Expired".to_string(),
            ExpiryDisplay::Offline => "Offline".to_string(),
        }
    }
}

/// Values substituted into a template.
#[derive(Debug, Clone)]
pub struct Placeholders<'a> {
    pub player: &'a str,
    pub group: &'a GroupDefinition,
    pub expiry: ExpiryDisplay,
    pub online_players: usize,
}

/// Expands the configured templates for one player or sign.
#[derive(Debug, Clone)]
pub struct Formatter {
    display: DisplaySettings,
    messages: MessageSettings,
    permissions: HashMap<GroupKey, Vec<String>>,
}

impl Formatter {
    pub fn new(settings: &RankSettings) -> Self {
        let permissions = settings
            .groups
            .permissions
            .iter()
            .map(|(group, nodes)| (GroupKey::new(group), nodes.clone()))
            .collect();

        Self {
            display: settings.display.clone(),
            messages: settings.messages.clone(),
            permissions,
        }
    }

    pub fn display(&self) -> &DisplaySettings {
        &self.display
    }

    pub fn messages(&self) -> &MessageSettings {
        &self.messages
    }

    /// Substitutes every placeholder and renders colour codes.
    pub fn expand(&self, template: &str, values: &Placeholders<'_>) -> String {
        let expanded = template
            .replace("%player%", values.player)
            .replace("%group_name%", &values.group.name)
            .replace("%rank%", &values.group.name)
            .replace("%group_prefix%", &values.group.raw_prefix)
            .replace("%expiry_time%", &values.expiry.text())
            .replace("%online_players%", &values.online_players.to_string());
        markup::render(&expanded)
    }

    pub fn permissions_for(&self, group: &GroupDefinition) -> Vec<String> {
        self.permissions
            .get(&group.key())
            .cloned()
            .unwrap_or_default()
    }

    /// Computes the full set of session effects for a connected player.
    pub fn session_effects(&self, values: &Placeholders<'_>) -> SessionEffects {
        let display_name = format!("{}{}", values.group.prefix(), values.player);

        let tab_name = self
            .display
            .tablist_enabled
            .then(|| self.expand(&self.display.tablist_format, values));

        let sidebar = self.display.sidebar_enabled.then(|| Sidebar {
            title: markup::render(&self.display.sidebar_title),
            lines: self
                .display
                .sidebar_lines
                .iter()
                .map(|line| self.expand(line, values))
                .collect(),
        });

        SessionEffects {
            group: values.group.name.clone(),
            display_name,
            tab_name,
            permissions: self.permissions_for(values.group),
            sidebar,
        }
    }

    /// The four lines of an info sign.
    pub fn sign_lines(&self, values: &Placeholders<'_>) -> [String; 4] {
        let lines = &self.display.sign_lines;
        [
            self.expand(&lines[0], values),
            self.expand(&lines[1], values),
            self.expand(&lines[2], values),
            self.expand(&lines[3], values),
        ]
    }

    /// Prefixed notice with `%group%` and `%time%` substituted.
    pub fn notice(&self, template: &str, group: &str, time: Option<&str>) -> String {
        let body = template
            .replace("%group%", group)
            .replace("%time%", time.unwrap_or(""));
        markup::render(&format!("{}{}", self.messages.prefix, body))
    }
}

/// Lines written to a sign whose group cannot be resolved at all.
pub fn unavailable_sign_lines() -> [String; 4] {
    [
        markup::render("&cError"),
        markup::render("&cGroup data"),
        markup::render("&cunavailable"),
        String::new(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerId;
    use chrono::TimeZone;

    fn admin() -> GroupDefinition {
        GroupDefinition::new("Admin", "&c[Admin]")
    }

    fn values(group: &GroupDefinition, expiry: ExpiryDisplay) -> Placeholders<'_> {
        Placeholders {
            player: "Steve",
            group,
            expiry,
            online_players: 3,
        }
    }

    #[test]
    fn expands_every_placeholder() {
        let formatter = Formatter::new(&RankSettings::default());
        let group = admin();
        let text = formatter.expand(
            "%group_prefix% &r%player% (%group_name%/%rank%) %expiry_time% %online_players%",
            &values(&group, ExpiryDisplay::Remaining(Duration::from_secs(3_661))),
        );
        assert_eq!(text, "§c[Admin] §rSteve (Admin/Admin) 1h 1m 1s 3");
    }

    #[test]
    fn expiry_display_from_assignment() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let player = PlayerId::new();
        let permanent = Assignment::permanent(player, "Admin");
        let expired = Assignment {
            expires_at: Some(now),
            ..permanent.clone()
        };
        let running = Assignment {
            expires_at: Some(now + chrono::TimeDelta::seconds(10)),
            ..permanent.clone()
        };

        assert_eq!(ExpiryDisplay::of(None, now), ExpiryDisplay::Permanent);
        assert_eq!(ExpiryDisplay::of(Some(&permanent), now), ExpiryDisplay::Permanent);
        assert_eq!(ExpiryDisplay::of(Some(&expired), now), ExpiryDisplay::Expired);
        assert_eq!(
            ExpiryDisplay::of(Some(&running), now),
            ExpiryDisplay::Remaining(Duration::from_secs(10))
        );
    }

    #[test]
    fn session_effects_follow_display_toggles() {
        let mut settings = RankSettings::default();
        settings
            .groups
            .permissions
            .insert("admin".into(), vec!["ranks.admin.*".into()]);
        settings.display.sidebar_enabled = false;
        let formatter = Formatter::new(&settings);
        let group = admin();

        let effects = formatter.session_effects(&values(&group, ExpiryDisplay::Permanent));
        assert_eq!(effects.display_name, "§c[Admin]Steve");
        assert_eq!(effects.tab_name.as_deref(), Some("§c[Admin] §rSteve"));
        assert_eq!(effects.permissions, vec!["ranks.admin.*".to_string()]);
        assert!(effects.sidebar.is_none());
    }

    #[test]
    fn offline_sign_variant_is_deterministic() {
        let formatter = Formatter::new(&RankSettings::default());
        let group = admin();
        let lines = formatter.sign_lines(&values(&group, ExpiryDisplay::Offline));
        assert_eq!(
            lines,
            [
                "§1[GroupInfo]".to_string(),
                "§0Steve".to_string(),
                "§c[Admin]".to_string(),
                "§7Offline".to_string(),
            ]
        );
    }

    #[test]
    fn notices_substitute_group_and_time() {
        let formatter = Formatter::new(&RankSettings::default());
        let text = formatter.notice(
            &formatter.messages().updated_player_temp.clone(),
            "Vip",
            Some("1d"),
        );
        assert!(text.starts_with("§8[§6Ranks§8] §r"));
        assert!(text.contains("§eVip"));
        assert!(text.contains("§e1d"));
    }
}
