//! Host-side consumers of rank state.
//!
//! The rank components compute *what* a player or sign should show; hosts
//! implement these traits to make it happen. All methods are called on the
//! main context.

use serde::Serialize;

use crate::types::{PlayerId, SurfaceId};

/// Sidebar (scoreboard) contents for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sidebar {
    pub title: String,
    pub lines: Vec<String>,
}

/// Everything a player's group changes about their live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEffects {
    /// Name of the resolved group.
    pub group: String,
    /// Rendered prefix followed by the player name.
    pub display_name: String,
    /// Tab-list entry, when the tab list is managed.
    pub tab_name: Option<String>,
    /// Permission nodes granted by the group.
    pub permissions: Vec<String>,
    /// Sidebar, when enabled.
    pub sidebar: Option<Sidebar>,
}

/// Applies session effects to connected players.
pub trait VisualEffectApplier: Send + Sync {
    /// Replaces whatever was previously applied to `player`.
    fn apply(&self, player: PlayerId, effects: &SessionEffects);

    /// Removes everything applied to `player`; called on disconnect.
    fn release(&self, player: PlayerId);

    /// Sends a rendered notice to `player`.
    fn notify(&self, player: PlayerId, message: &str);
}

/// What the world currently holds at a sign position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceProbe {
    /// A sign with its current four lines.
    Sign([String; 4]),
    /// The block exists but is no longer a sign.
    NotASign,
    /// The world or chunk is not loaded; nothing can be said.
    Unloaded,
}

/// Access to physical signs and player names.
pub trait SurfaceWorld: Send + Sync {
    fn probe(&self, surface: &SurfaceId) -> SurfaceProbe;

    fn write_lines(&self, surface: &SurfaceId, lines: &[String; 4]);

    /// Last known name of any player, connected or not.
    fn player_name(&self, player: PlayerId) -> Option<String>;
}
