//! # Info Sign Index
//!
//! Maps sign positions to the player each sign displays and keeps the sign
//! text in step with that player's group.
//!
//! Connected players are rendered from the live assignment cache. Players
//! who are offline are rendered from the last assignment known for them,
//! which is either remembered from their last session or fetched from
//! storage on first use; until that fetch lands the default group is shown.
//! Offline signs use the offline variant of the expiry line. A failed
//! fetch is retried no sooner than [`OFFLINE_RETRY_SECS`] seconds later,
//! and what is known about a player is forgotten once no sign tracks them.
//!
//! A render pass never fails as a whole. Signs in unloaded chunks are
//! skipped, signs whose block is no longer a sign are unbound, and a sign
//! whose group cannot be resolved at all shows an error text.

use std::sync::{Arc, Weak};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::assignments::AssignmentCache;
use crate::clock::Clock;
use crate::effects::{SurfaceProbe, SurfaceWorld};
use crate::error::GatewayError;
use crate::format::{unavailable_sign_lines, ExpiryDisplay, Formatter, Placeholders};
use crate::gateway::PersistenceGateway;
use crate::listener::RankListener;
use crate::main_context::{is_main_context, MainHandle};
use crate::registry::GroupRegistry;
use crate::types::{
    Assignment, GroupDefinition, PlayerId, StoredAssignment, SurfaceBinding, SurfaceId,
};

/// Minimum wait, in seconds, before a failed offline fetch is tried again.
pub const OFFLINE_RETRY_SECS: i64 = 30;

/// What rendering one sign did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderResult {
    Written,
    Unchanged,
    /// The sign's chunk or world is not loaded.
    Skipped,
    /// The sign was not bound, or was unbound because it is gone.
    Unbound,
    /// No group could be resolved; an error text is shown.
    Unavailable,
}

/// Tally of a render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub unbound: usize,
    pub unavailable: usize,
}

impl RenderSummary {
    fn record(&mut self, result: RenderResult) {
        match result {
            RenderResult::Written => self.written += 1,
            RenderResult::Unchanged => self.unchanged += 1,
            RenderResult::Skipped => self.skipped += 1,
            RenderResult::Unbound => self.unbound += 1,
            RenderResult::Unavailable => self.unavailable += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.written + self.unchanged + self.skipped + self.unbound + self.unavailable
    }
}

pub struct DisplaySurfaceIndex {
    me: Weak<DisplaySurfaceIndex>,
    bindings: DashMap<SurfaceId, PlayerId>,
    /// Last known assignment of offline tracked players. `None` means
    /// storage holds no usable assignment for them.
    offline: DashMap<PlayerId, Option<Assignment>>,
    fetching: DashMap<PlayerId, ()>,
    /// Earliest retry of a failed offline fetch.
    retry_after: DashMap<PlayerId, DateTime<Utc>>,
    assignments: Arc<AssignmentCache>,
    registry: Arc<GroupRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    main: MainHandle,
    world: Arc<dyn SurfaceWorld>,
    formatter: Arc<Formatter>,
    clock: Arc<dyn Clock>,
}

impl DisplaySurfaceIndex {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        assignments: Arc<AssignmentCache>,
        registry: Arc<GroupRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        main: MainHandle,
        world: Arc<dyn SurfaceWorld>,
        formatter: Arc<Formatter>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            bindings: DashMap::new(),
            offline: DashMap::new(),
            fetching: DashMap::new(),
            retry_after: DashMap::new(),
            assignments,
            registry,
            gateway,
            main,
            world,
            formatter,
            clock,
        })
    }

    /// Replaces the bindings with what storage holds.
    pub async fn load(&self) -> bool {
        match self.gateway.list_surfaces().await {
            Ok(bindings) => {
                let Some(index) = self.me.upgrade() else {
                    return false;
                };
                self.main
                    .call(move || index.replace_all(bindings))
                    .await
                    .is_ok()
            }
            Err(e) => {
                error!("❌ Failed to load info signs: {}", e);
                false
            }
        }
    }

    pub fn is_bound(&self, surface: &SurfaceId) -> bool {
        self.bindings.contains_key(surface)
    }

    pub fn bound_player(&self, surface: &SurfaceId) -> Option<PlayerId> {
        self.bindings.get(surface).map(|player| *player)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Binds a sign to a player, persists in the background and renders.
    pub fn bind(&self, surface: SurfaceId, player: PlayerId) -> RenderResult {
        debug_assert!(is_main_context());
        self.bindings.insert(surface.clone(), player);
        info!("🪧 Info sign at {} now tracks {}", surface, player);

        let binding = SurfaceBinding {
            surface: surface.clone(),
            tracked_player: player,
        };
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(e) = gateway.save_surface(&binding).await {
                error!("❌ Failed to store info sign at {}: {}", binding.surface, e);
            }
        });

        self.render_one(&surface, player)
    }

    /// Removes a binding and deletes it from storage in the background.
    pub fn unbind(&self, surface: &SurfaceId) -> bool {
        debug_assert!(is_main_context());
        let Some((_, player)) = self.bindings.remove(surface) else {
            return false;
        };
        info!("🪧 Info sign at {} removed", surface);
        if !self.tracks(player) {
            self.forget(player);
        }

        let surface = surface.clone();
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(e) = gateway.delete_surface(&surface).await {
                error!("❌ Failed to delete info sign at {}: {}", surface, e);
            }
        });
        true
    }

    /// Renders one bound sign, writing only if its text changed.
    pub fn render_one(&self, surface: &SurfaceId, player: PlayerId) -> RenderResult {
        debug_assert!(is_main_context());
        if !self.is_bound(surface) {
            return RenderResult::Unbound;
        }

        let current = match self.world.probe(surface) {
            SurfaceProbe::Unloaded => return RenderResult::Skipped,
            SurfaceProbe::NotASign => {
                info!("🪧 Block at {} is no longer a sign, unbinding", surface);
                self.unbind(surface);
                return RenderResult::Unbound;
            }
            SurfaceProbe::Sign(lines) => lines,
        };

        let now = self.clock.now();
        let online_players = self.assignments.online_count();
        let view = match self.assignments.session_name(player) {
            Some(name) => self.assignments.resolve(player).map(|group| {
                let current = self
                    .assignments
                    .assignment(player)
                    .filter(|a| group.is_named(&a.group_name));
                let expiry = ExpiryDisplay::of(current.as_ref(), now);
                (name, group, expiry)
            }),
            None => {
                let name = self
                    .world
                    .player_name(player)
                    .unwrap_or_else(|| "Unknown".to_string());
                self.offline_group(player, now)
                    .map(|group| (name, group, ExpiryDisplay::Offline))
            }
        };

        let (lines, result) = match view {
            Some((name, group, expiry)) => (
                self.formatter.sign_lines(&Placeholders {
                    player: &name,
                    group: &group,
                    expiry,
                    online_players,
                }),
                RenderResult::Written,
            ),
            None => {
                error!("❌ CRITICAL: no group available for info sign at {}", surface);
                (unavailable_sign_lines(), RenderResult::Unavailable)
            }
        };

        if lines == current {
            return match result {
                RenderResult::Written => RenderResult::Unchanged,
                other => other,
            };
        }
        self.world.write_lines(surface, &lines);
        result
    }

    /// Renders a snapshot of every binding.
    pub fn render_all(&self) -> RenderSummary {
        let snapshot: Vec<(SurfaceId, PlayerId)> = self
            .bindings
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        let mut summary = RenderSummary::default();
        for (surface, player) in snapshot {
            summary.record(self.render_one(&surface, player));
        }
        if summary.written > 0 || summary.unbound > 0 {
            debug!("🪧 Sign pass: {:?}", summary);
        }
        summary
    }

    /// Renders signs whose tracked player currently shows as `group`.
    pub fn render_for_group(&self, group: &GroupDefinition) -> RenderSummary {
        let now = self.clock.now();
        let targets: Vec<(SurfaceId, PlayerId)> = self
            .bindings
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .filter(|(_, player)| {
                let shown = if self.assignments.is_connected(*player) {
                    self.assignments.resolve(*player)
                } else {
                    self.offline_known_group(*player, now)
                };
                shown.is_some_and(|shown| shown == *group)
            })
            .collect();

        let mut summary = RenderSummary::default();
        for (surface, player) in targets {
            summary.record(self.render_one(&surface, player));
        }
        summary
    }

    /// Renders every sign tracking `player`.
    pub fn render_for_player(&self, player: PlayerId) -> RenderSummary {
        let targets: Vec<SurfaceId> = self
            .bindings
            .iter()
            .filter(|entry| *entry.value() == player)
            .map(|entry| entry.key().clone())
            .collect();

        let mut summary = RenderSummary::default();
        for surface in targets {
            summary.record(self.render_one(&surface, player));
        }
        summary
    }

    // ------------------------------------------------------------------
    // Offline players
    // ------------------------------------------------------------------

    /// Group shown for an offline player without triggering a fetch.
    fn offline_known_group(&self, player: PlayerId, now: DateTime<Utc>) -> Option<GroupDefinition> {
        let known = self.offline.get(&player).map(|entry| entry.clone());
        match known {
            Some(Some(assignment)) if !assignment.is_expired(now) => self
                .registry
                .get(&assignment.group_name)
                .or_else(|| self.registry.default_group()),
            _ => self.registry.default_group(),
        }
    }

    fn offline_group(&self, player: PlayerId, now: DateTime<Utc>) -> Option<GroupDefinition> {
        let backing_off = self
            .retry_after
            .get(&player)
            .is_some_and(|retry_at| now < *retry_at);
        if !self.offline.contains_key(&player) && !backing_off {
            self.fetch_offline(player);
        }
        self.offline_known_group(player, now)
    }

    /// Whether any binding tracks `player`.
    fn tracks(&self, player: PlayerId) -> bool {
        self.bindings.iter().any(|entry| *entry.value() == player)
    }

    fn forget(&self, player: PlayerId) {
        self.offline.remove(&player);
        self.retry_after.remove(&player);
    }

    fn fetch_offline(&self, player: PlayerId) {
        if self.fetching.insert(player, ()).is_some() {
            return;
        }
        let Some(index) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let loaded = index.gateway.get_assignment(player).await;
            let settler = Arc::clone(&index);
            index
                .main
                .run(move || settler.settle_offline(player, loaded));
        });
    }

    fn settle_offline(
        &self,
        player: PlayerId,
        loaded: Result<Option<StoredAssignment>, GatewayError>,
    ) {
        debug_assert!(is_main_context());
        self.fetching.remove(&player);
        if !self.tracks(player) {
            self.forget(player);
            return;
        }
        match loaded {
            Ok(record) => {
                self.retry_after.remove(&player);
                let known = record.and_then(|record| {
                    record.group_name.map(|group_name| Assignment {
                        player,
                        group_name,
                        expires_at: record.expires_at,
                    })
                });
                self.offline.insert(player, known);
                if !self.assignments.is_connected(player) {
                    self.render_for_player(player);
                }
            }
            Err(e) => {
                warn!("⚠️ Could not load stored group of offline player {}: {}", player, e);
                self.retry_after
                    .insert(player, self.clock.now() + TimeDelta::seconds(OFFLINE_RETRY_SECS));
            }
        }
    }

    fn replace_all(&self, bindings: Vec<SurfaceBinding>) {
        debug_assert!(is_main_context());
        self.bindings.clear();
        for binding in bindings {
            self.bindings.insert(binding.surface, binding.tracked_player);
        }
        info!("🪧 Loaded {} info sign(s)", self.bindings.len());
    }
}

impl RankListener for DisplaySurfaceIndex {
    fn group_updated(&self, group: &GroupDefinition) {
        self.render_for_group(group);
    }

    fn assignment_changed(&self, player: PlayerId, assignment: &Assignment) {
        if !self.tracks(player) {
            return;
        }
        if self.assignments.is_connected(player) {
            self.offline.remove(&player);
        } else {
            self.offline.insert(player, Some(assignment.clone()));
            self.retry_after.remove(&player);
        }
        self.render_for_player(player);
    }

    fn session_ended(&self, player: PlayerId, last: Option<&Assignment>) {
        if !self.tracks(player) {
            return;
        }
        match last {
            Some(assignment) => {
                self.offline.insert(player, Some(assignment.clone()));
                self.retry_after.remove(&player);
            }
            None => {
                self.offline.remove(&player);
            }
        }
        self.render_for_player(player);
    }
}
