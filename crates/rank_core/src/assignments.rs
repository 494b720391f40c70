//! # Assignment Cache
//!
//! Holds the live assignment of every connected player and keeps their
//! session effects in step with it.
//!
//! ## Lifecycle
//!
//! 1. [`AssignmentCache::on_connect`] opens a session and loads the stored
//!    assignment on the worker pool.
//! 2. The result is settled on the main context: a missing, dangling or
//!    expired record falls back to the default group, anything else becomes
//!    live. Effects are applied either way.
//! 3. [`AssignmentCache::on_disconnect`] drops the session and releases its
//!    effects. Storage is left alone.
//!
//! Each session carries an epoch. A load that finishes after its session
//! was closed or replaced is discarded.
//!
//! ## Writes
//!
//! Administrative reassignment persists first and commits after storage
//! acknowledged it. The connect-time default fallback is the exception: it
//! commits immediately and persists in the background.
//!
//! Writes for one player are serialized. A background default write that
//! was overtaken by a later write, or whose session has moved on to another
//! group, is dropped so storage and cache agree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::duration::format_duration;
use crate::effects::VisualEffectApplier;
use crate::error::GatewayError;
use crate::format::{ExpiryDisplay, Formatter, Placeholders};
use crate::gateway::PersistenceGateway;
use crate::listener::{Listeners, RankListener};
use crate::main_context::{is_main_context, MainHandle};
use crate::outcome::{AssignOutcome, ConnectResolution};
use crate::registry::GroupRegistry;
use crate::types::{
    Assignment, AssignmentTerm, GroupDefinition, PlayerId, StoredAssignment,
};

struct Session {
    name: String,
    epoch: u64,
    assignment: Option<Assignment>,
}

/// Answer to a player's "what group am I in" query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub group: String,
    pub prefix: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// `Permanent` or the formatted time left.
    pub remaining: String,
}

pub struct AssignmentCache {
    me: Weak<AssignmentCache>,
    sessions: DashMap<PlayerId, Session>,
    next_epoch: AtomicU64,
    /// Sequence of the most recent write that reached storage, per player.
    write_slots: DashMap<PlayerId, Arc<AsyncMutex<u64>>>,
    next_write: AtomicU64,
    registry: Arc<GroupRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    main: MainHandle,
    clock: Arc<dyn Clock>,
    applier: Arc<dyn VisualEffectApplier>,
    formatter: Arc<Formatter>,
    listeners: Listeners,
}

impl AssignmentCache {
    pub fn new(
        registry: Arc<GroupRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        main: MainHandle,
        clock: Arc<dyn Clock>,
        applier: Arc<dyn VisualEffectApplier>,
        formatter: Arc<Formatter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            sessions: DashMap::new(),
            next_epoch: AtomicU64::new(0),
            write_slots: DashMap::new(),
            next_write: AtomicU64::new(0),
            registry,
            gateway,
            main,
            clock,
            applier,
            formatter,
            listeners: Listeners::default(),
        })
    }

    /// Registers for assignment and session notifications.
    pub fn subscribe(&self, listener: Weak<dyn RankListener>) {
        self.listeners.subscribe(listener);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn is_connected(&self, player: PlayerId) -> bool {
        self.sessions.contains_key(&player)
    }

    pub fn session_name(&self, player: PlayerId) -> Option<String> {
        self.sessions.get(&player).map(|s| s.name.clone())
    }

    /// The cached assignment; `None` while offline or still loading.
    pub fn assignment(&self, player: PlayerId) -> Option<Assignment> {
        self.sessions
            .get(&player)
            .and_then(|s| s.assignment.clone())
    }

    /// Snapshot of connected players and their names.
    pub fn connected(&self) -> Vec<(PlayerId, String)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.name.clone()))
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }

    /// The player's group if their assignment is valid, else the default.
    ///
    /// Returns `None` only when the default group itself is missing, in
    /// which case a repair has been scheduled.
    pub fn resolve(&self, player: PlayerId) -> Option<GroupDefinition> {
        let assigned = self
            .sessions
            .get(&player)
            .and_then(|s| s.assignment.as_ref().map(|a| a.group_name.clone()));

        if let Some(name) = assigned {
            if let Some(group) = self.registry.get(&name) {
                return Some(group);
            }
            debug!("Group '{}' assigned to {} no longer exists, using default", name, player);
        }

        let fallback = self.registry.default_group();
        if fallback.is_none() {
            error!("❌ CRITICAL: no group can be resolved for {}", player);
        }
        fallback
    }

    /// Group, rendered prefix and time left for a connected player.
    pub fn info(&self, player: PlayerId) -> Option<GroupInfo> {
        if !self.is_connected(player) {
            return None;
        }
        let group = self.resolve(player)?;
        let assignment = self
            .assignment(player)
            .filter(|a| group.is_named(&a.group_name));
        let expiry = ExpiryDisplay::of(assignment.as_ref(), self.clock.now());

        Some(GroupInfo {
            prefix: group.prefix(),
            group: group.name,
            expires_at: assignment.and_then(|a| a.expires_at),
            remaining: expiry.text(),
        })
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Opens a session and settles the player's assignment.
    pub async fn on_connect(self: &Arc<Self>, player: PlayerId, name: &str) -> ConnectResolution {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;

        let cache = Arc::clone(self);
        let session_name = name.to_string();
        if self
            .main
            .call(move || cache.open_session(player, session_name, epoch))
            .await
            .is_err()
        {
            return ConnectResolution::Discarded;
        }

        let cache = Arc::clone(self);
        let load = tokio::spawn(async move {
            let loaded = cache.gateway.get_assignment(player).await;
            let settler = Arc::clone(&cache);
            cache
                .main
                .call(move || settler.settle_connect(player, epoch, loaded))
                .await
                .unwrap_or(ConnectResolution::Discarded)
        });
        load.await.unwrap_or(ConnectResolution::Discarded)
    }

    /// Closes the session and releases its effects.
    ///
    /// # Returns
    ///
    /// `true` if the player had a session.
    pub async fn on_disconnect(self: &Arc<Self>, player: PlayerId) -> bool {
        let cache = Arc::clone(self);
        self.main
            .call(move || cache.close_session(player))
            .await
            .unwrap_or(false)
    }

    /// Releases every open session; used on shutdown.
    pub async fn release_all(self: &Arc<Self>) -> usize {
        let cache = Arc::clone(self);
        self.main
            .call(move || {
                let players: Vec<PlayerId> = cache.sessions.iter().map(|e| *e.key()).collect();
                for player in &players {
                    cache.applier.release(*player);
                }
                cache.sessions.clear();
                players.len()
            })
            .await
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Administrative reassignment
    // ------------------------------------------------------------------

    /// Assigns `player` to `group_name` for `term`.
    ///
    /// Offline players are only persisted; connected players also get their
    /// effects refreshed and a confirmation notice.
    pub async fn assign(
        self: &Arc<Self>,
        player: PlayerId,
        group_name: &str,
        term: AssignmentTerm,
    ) -> AssignOutcome {
        let Some(group) = self.registry.get(group_name) else {
            warn!("⚠️ Cannot assign {} to unknown group '{}'", player, group_name);
            return AssignOutcome::GroupNotFound;
        };

        let expires_at = match term.expiry_from(self.clock.now()) {
            Ok(expires_at) => expires_at,
            Err(e) => {
                warn!("⚠️ Cannot assign {} to '{}': {}", player, group.name, e);
                return AssignOutcome::Failed;
            }
        };
        let assignment = Assignment {
            player,
            group_name: group.name,
            expires_at,
        };

        let cache = Arc::clone(self);
        let persist = tokio::spawn(async move {
            let record = StoredAssignment::from(&assignment);
            if let Err(e) = cache.store_assignment(&record).await {
                error!(
                    "❌ Failed to store group '{}' for {}: {}",
                    assignment.group_name, player, e
                );
                return AssignOutcome::Failed;
            }
            info!(
                "💾 Stored group '{}' for {} (expires {})",
                assignment.group_name,
                player,
                assignment
                    .expires_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );

            let committer = Arc::clone(&cache);
            if cache
                .main
                .call(move || committer.commit_assignment(assignment, term))
                .await
                .is_err()
            {
                warn!("⚠️ Main context closed before group change for {} was applied", player);
            }
            AssignOutcome::Ok
        });
        persist.await.unwrap_or(AssignOutcome::Failed)
    }

    // ------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------

    /// Players whose cached assignment has expired at `now`.
    pub fn expired_candidates(&self, now: DateTime<Utc>) -> Vec<PlayerId> {
        self.sessions
            .iter()
            .filter(|entry| {
                entry
                    .assignment
                    .as_ref()
                    .is_some_and(|a| a.is_expired(now))
            })
            .map(|entry| *entry.key())
            .collect()
    }

    /// One expiry pass: scan off the main context, reassign on it.
    ///
    /// # Returns
    ///
    /// How many players were moved back to the default group.
    pub async fn sweep(self: &Arc<Self>) -> usize {
        let candidates = self.expired_candidates(self.clock.now());
        if candidates.is_empty() {
            return 0;
        }
        debug!("⌛ {} expired assignment candidate(s)", candidates.len());

        let cache = Arc::clone(self);
        self.main
            .call(move || cache.expire(candidates))
            .await
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Ordered writes
    // ------------------------------------------------------------------

    fn write_slot(&self, player: PlayerId) -> Arc<AsyncMutex<u64>> {
        self.write_slots.entry(player).or_default().clone()
    }

    fn next_write(&self) -> u64 {
        self.next_write.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Stores an administrative assignment as the newest write for its
    /// player.
    async fn store_assignment(&self, record: &StoredAssignment) -> Result<(), GatewayError> {
        let slot = self.write_slot(record.player);
        let mut last = slot.lock().await;
        let seq = self.next_write();
        self.gateway.set_assignment(record).await?;
        *last = seq;
        Ok(())
    }

    /// Stores a default fallback issued as write `seq`.
    ///
    /// # Returns
    ///
    /// `false` if a newer write reached storage first or the session has
    /// since been given another group; nothing is written then.
    async fn store_default(
        &self,
        record: &StoredAssignment,
        seq: u64,
    ) -> Result<bool, GatewayError> {
        let slot = self.write_slot(record.player);
        let mut last = slot.lock().await;
        let moved_on = self
            .assignment(record.player)
            .is_some_and(|current| record.group_name.as_deref() != Some(current.group_name.as_str()));
        if *last > seq || moved_on {
            debug!("Skipping superseded default write for {}", record.player);
            return Ok(false);
        }
        self.gateway.set_assignment(record).await?;
        *last = seq;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Main-context steps
    // ------------------------------------------------------------------

    fn open_session(&self, player: PlayerId, name: String, epoch: u64) {
        debug_assert!(is_main_context());
        let previous = self.sessions.insert(
            player,
            Session {
                name: name.clone(),
                epoch,
                assignment: None,
            },
        );
        if previous.is_some() {
            debug!("Replacing existing session for {}", player);
        }
        info!("🎮 {} ({}) connected", name, player);
    }

    fn close_session(&self, player: PlayerId) -> bool {
        debug_assert!(is_main_context());
        let Some((_, session)) = self.sessions.remove(&player) else {
            return false;
        };
        self.applier.release(player);
        info!("👋 {} ({}) disconnected", session.name, player);
        self.listeners
            .notify(|listener| listener.session_ended(player, session.assignment.as_ref()));
        true
    }

    fn is_current(&self, player: PlayerId, epoch: u64) -> bool {
        self.sessions
            .get(&player)
            .is_some_and(|session| session.epoch == epoch)
    }

    fn settle_connect(
        &self,
        player: PlayerId,
        epoch: u64,
        loaded: Result<Option<StoredAssignment>, GatewayError>,
    ) -> ConnectResolution {
        debug_assert!(is_main_context());
        if !self.is_current(player, epoch) {
            debug!("Discarding stale assignment load for {}", player);
            return ConnectResolution::Discarded;
        }

        let record = match loaded {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("🆕 No stored group for {}, assigning default", player);
                return self.fallback(player, false, ConnectResolution::DefaultAssigned);
            }
            Err(e) => {
                error!("❌ Failed to load group of {}: {} - assigning default", player, e);
                return self.fallback(player, false, ConnectResolution::DefaultAssigned);
            }
        };

        let group = record
            .group_name
            .as_deref()
            .and_then(|name| self.registry.get(name));
        let Some(group) = group else {
            warn!(
                "⚠️ Stored group {:?} of {} no longer exists, assigning default",
                record.group_name, player
            );
            return self.fallback(player, false, ConnectResolution::DanglingReplaced);
        };

        let assignment = Assignment {
            player,
            group_name: group.name,
            expires_at: record.expires_at,
        };
        if assignment.is_expired(self.clock.now()) {
            info!(
                "⌛ Group '{}' of {} expired while offline",
                assignment.group_name, player
            );
            return self.fallback(player, true, ConnectResolution::ExpiredReplaced);
        }

        self.commit(assignment);
        ConnectResolution::Loaded
    }

    fn fallback(
        &self,
        player: PlayerId,
        expired_notice: bool,
        resolution: ConnectResolution,
    ) -> ConnectResolution {
        if self.assign_default(player, expired_notice) {
            resolution
        } else {
            ConnectResolution::Unresolved
        }
    }

    /// Commits the default group optimistically and persists it in the
    /// background.
    fn assign_default(&self, player: PlayerId, expired_notice: bool) -> bool {
        let Some(default) = self.registry.default_group() else {
            error!("❌ CRITICAL: default group unavailable, {} keeps no group", player);
            return false;
        };

        let assignment = Assignment::permanent(player, default.name);
        let record = StoredAssignment::from(&assignment);
        let seq = self.next_write();
        self.commit(assignment);

        if let Some(cache) = self.me.upgrade() {
            tokio::spawn(async move {
                if let Err(e) = cache.store_default(&record, seq).await {
                    error!("❌ Failed to store default group for {}: {}", record.player, e);
                }
            });
        }
        if expired_notice {
            let message = self.formatter.notice(
                &self.formatter.messages().expired_notice,
                self.registry.default_name(),
                None,
            );
            self.applier.notify(player, &message);
        }
        true
    }

    fn commit(&self, assignment: Assignment) {
        debug_assert!(is_main_context());
        let player = assignment.player;
        match self.sessions.get_mut(&player) {
            Some(mut session) => session.assignment = Some(assignment.clone()),
            None => return,
        }
        self.apply_effects(player);
        self.listeners
            .notify(|listener| listener.assignment_changed(player, &assignment));
    }

    fn commit_assignment(&self, assignment: Assignment, term: AssignmentTerm) {
        debug_assert!(is_main_context());
        let player = assignment.player;
        if !self.is_connected(player) {
            debug!("{} is offline; group change stored only", player);
            self.listeners
                .notify(|listener| listener.assignment_changed(player, &assignment));
            return;
        }

        let group = assignment.group_name.clone();
        self.commit(assignment);

        let messages = self.formatter.messages();
        let message = match term {
            AssignmentTerm::Temporary(length) if !length.is_zero() => self.formatter.notice(
                &messages.updated_player_temp,
                &group,
                Some(&format_duration(length)),
            ),
            _ => self.formatter.notice(&messages.updated_player, &group, None),
        };
        self.applier.notify(player, &message);
    }

    fn expire(&self, candidates: Vec<PlayerId>) -> usize {
        debug_assert!(is_main_context());
        let now = self.clock.now();
        let mut expired = 0;
        for player in candidates {
            let still_expired = self
                .assignment(player)
                .is_some_and(|a| a.is_expired(now));
            if !still_expired {
                continue;
            }
            info!("⌛ Temporary group of {} expired", player);
            if self.assign_default(player, true) {
                expired += 1;
            }
        }
        expired
    }

    fn apply_effects(&self, player: PlayerId) {
        let Some((name, assignment)) = self
            .sessions
            .get(&player)
            .map(|s| (s.name.clone(), s.assignment.clone()))
        else {
            return;
        };
        let Some(group) = self.resolve(player) else {
            return;
        };

        let current = assignment.filter(|a| group.is_named(&a.group_name));
        let effects = self.formatter.session_effects(&Placeholders {
            player: &name,
            group: &group,
            expiry: ExpiryDisplay::of(current.as_ref(), self.clock.now()),
            online_players: self.online_count(),
        });
        self.applier.apply(player, &effects);
    }

    /// Re-applies effects for every connected player shown as `group`.
    pub fn refresh_group(&self, group: &GroupDefinition) {
        debug_assert!(is_main_context());
        let is_default = self.registry.is_default(&group.name);
        let players: Vec<PlayerId> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry.assignment.as_ref().is_some_and(|a| {
                    group.is_named(&a.group_name)
                        || (is_default && !self.registry.contains(&a.group_name))
                })
            })
            .map(|entry| *entry.key())
            .collect();

        debug!("🎨 Refreshing {} session(s) for group '{}'", players.len(), group.name);
        for player in players {
            self.apply_effects(player);
        }
    }
}

impl RankListener for AssignmentCache {
    fn group_updated(&self, group: &GroupDefinition) {
        self.refresh_group(group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayOp;
    use crate::outcome::{CreateOutcome, DeleteOutcome, PrefixOutcome};
    use crate::testing::Rig;
    use std::time::Duration;

    #[tokio::test]
    async fn first_connect_assigns_and_persists_default() {
        let rig = Rig::started().await;
        let player = PlayerId::new();

        let resolution = rig.system.assignments.on_connect(player, "Steve").await;
        assert_eq!(resolution, ConnectResolution::DefaultAssigned);
        assert_eq!(rig.system.assignments.resolve(player).unwrap().name, "Default");

        let effects = rig.applier.effects(player).unwrap();
        assert_eq!(effects.display_name, "§7Steve");
        assert_eq!(effects.group, "Default");

        rig.settle().await;
        let stored = rig.gateway.stored_assignment(player).unwrap();
        assert_eq!(stored.group_name.as_deref(), Some("Default"));
        assert!(stored.expires_at.is_none());
    }

    #[tokio::test]
    async fn permanent_assignment_survives_reconnect() {
        let rig = Rig::started().await;
        let cache = &rig.system.assignments;
        let player = PlayerId::new();
        assert_eq!(rig.system.registry.create("mod", "&9[Mod]").await, CreateOutcome::Created);

        cache.on_connect(player, "Alex").await;
        assert_eq!(
            cache.assign(player, "MOD", AssignmentTerm::Permanent).await,
            AssignOutcome::Ok
        );
        assert_eq!(cache.resolve(player).unwrap().name, "mod");
        assert!(rig
            .applier
            .notices_for(player)
            .last()
            .unwrap()
            .contains("mod"));

        assert!(cache.on_disconnect(player).await);
        assert!(rig.applier.was_released(player));
        assert!(cache.assignment(player).is_none());

        assert_eq!(cache.on_connect(player, "Alex").await, ConnectResolution::Loaded);
        assert_eq!(cache.resolve(player).unwrap().name, "mod");
        assert_eq!(rig.applier.effects(player).unwrap().display_name, "§9[Mod]Alex");
    }

    #[tokio::test]
    async fn temporary_assignment_expires_on_sweep() {
        let rig = Rig::started().await;
        let cache = &rig.system.assignments;
        let player = PlayerId::new();
        rig.system.registry.create("vip", "&6[VIP]").await;

        cache.on_connect(player, "Kim").await;
        assert_eq!(
            cache
                .assign(player, "vip", AssignmentTerm::Temporary(Duration::from_secs(3_600)))
                .await,
            AssignOutcome::Ok
        );
        assert!(rig.applier.notices_for(player).last().unwrap().contains("1h"));
        assert_eq!(cache.sweep().await, 0);

        rig.clock.advance(Duration::from_secs(3_601));
        assert_eq!(cache.expired_candidates(rig.clock.now()), vec![player]);
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.resolve(player).unwrap().name, "Default");
        assert!(rig
            .applier
            .notices_for(player)
            .last()
            .unwrap()
            .contains("expired"));

        rig.settle().await;
        let stored = rig.gateway.stored_assignment(player).unwrap();
        assert_eq!(stored.group_name.as_deref(), Some("Default"));
        assert!(stored.expires_at.is_none());
    }

    #[tokio::test]
    async fn expired_record_is_replaced_on_connect() {
        let rig = Rig::started().await;
        let player = PlayerId::new();
        rig.system.registry.create("vip", "&6").await;
        rig.gateway
            .set_assignment(&StoredAssignment {
                player,
                group_name: Some("vip".into()),
                expires_at: Some(rig.clock.now() - chrono::TimeDelta::seconds(1)),
            })
            .await
            .unwrap();

        let resolution = rig.system.assignments.on_connect(player, "Lee").await;
        assert_eq!(resolution, ConnectResolution::ExpiredReplaced);
        assert_eq!(rig.applier.notices_for(player).len(), 1);
        assert_eq!(rig.system.assignments.resolve(player).unwrap().name, "Default");
    }

    #[tokio::test]
    async fn deleted_group_falls_back_after_reconnect() {
        let rig = Rig::started().await;
        let cache = &rig.system.assignments;
        let registry = &rig.system.registry;
        let player = PlayerId::new();

        assert_eq!(registry.create("Admin", "&c[Admin]").await, CreateOutcome::Created);
        cache.on_connect(player, "Root").await;
        cache.assign(player, "Admin", AssignmentTerm::Permanent).await;
        let admin = cache.resolve(player).unwrap();
        assert_eq!(admin.prefix(), "§c[Admin]");
        assert_eq!(admin.plain_prefix(), "[Admin]");

        assert_eq!(registry.delete("admin").await, DeleteOutcome::Deleted);
        assert_eq!(cache.assignment(player).unwrap().group_name, "Admin");
        assert_eq!(rig.applier.effects(player).unwrap().group, "Admin");

        cache.on_disconnect(player).await;
        assert_eq!(cache.on_connect(player, "Root").await, ConnectResolution::DanglingReplaced);
        assert_eq!(cache.resolve(player).unwrap().name, "Default");
    }

    #[tokio::test]
    async fn failed_assign_leaves_cache_untouched() {
        let rig = Rig::started().await;
        let cache = &rig.system.assignments;
        let player = PlayerId::new();
        rig.system.registry.create("vip", "&6").await;
        cache.on_connect(player, "Sam").await;
        let notices = rig.applier.notices_for(player).len();

        assert_eq!(
            cache.assign(player, "ghost", AssignmentTerm::Permanent).await,
            AssignOutcome::GroupNotFound
        );

        rig.gateway.fail(GatewayOp::SetAssignment);
        assert_eq!(
            cache.assign(player, "vip", AssignmentTerm::Permanent).await,
            AssignOutcome::Failed
        );
        assert_eq!(cache.resolve(player).unwrap().name, "Default");
        assert_eq!(rig.applier.notices_for(player).len(), notices);
    }

    #[tokio::test]
    async fn assign_past_the_calendar_fails_instead_of_becoming_permanent() {
        let rig = Rig::started().await;
        let cache = &rig.system.assignments;
        let player = PlayerId::new();
        rig.system.registry.create("vip", "&6").await;
        cache.on_connect(player, "Max").await;
        rig.settle().await;

        let huge = crate::duration::parse_duration("99999999d").unwrap();
        assert_eq!(
            cache.assign(player, "vip", AssignmentTerm::Temporary(huge)).await,
            AssignOutcome::Failed
        );
        assert_eq!(cache.resolve(player).unwrap().name, "Default");
        assert_eq!(
            rig.gateway.stored_assignment(player).unwrap().group_name.as_deref(),
            Some("Default")
        );
    }

    #[tokio::test]
    async fn group_deleted_while_assign_persists_still_stores() {
        let rig = Rig::started().await;
        let cache = rig.system.assignments.clone();
        let player = PlayerId::new();
        rig.system.registry.create("vip", "&6").await;
        cache.on_connect(player, "Eve").await;
        rig.settle().await;
        rig.gateway.set_latency(Duration::from_millis(40));

        let delete = {
            let registry = rig.system.registry.clone();
            tokio::spawn(async move { registry.delete("vip").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(
            cache.assign(player, "vip", AssignmentTerm::Permanent).await,
            AssignOutcome::Ok
        );
        assert_eq!(delete.await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(cache.resolve(player).unwrap().name, "Default");
        assert_eq!(rig.gateway.stored_assignment(player).unwrap().group_name, None);
    }

    #[tokio::test]
    async fn superseded_default_write_is_dropped() {
        let rig = Rig::started().await;
        let cache = &rig.system.assignments;
        let player = PlayerId::new();
        rig.system.registry.create("mod", "&9").await;
        cache.on_connect(player, "Nia").await;
        let stale = cache.next_write();

        assert_eq!(
            cache.assign(player, "mod", AssignmentTerm::Permanent).await,
            AssignOutcome::Ok
        );
        let default = StoredAssignment {
            player,
            group_name: Some("Default".into()),
            expires_at: None,
        };
        assert!(!cache.store_default(&default, stale).await.unwrap());

        rig.settle().await;
        assert_eq!(
            rig.gateway.stored_assignment(player).unwrap().group_name.as_deref(),
            Some("mod")
        );
        assert_eq!(cache.resolve(player).unwrap().name, "mod");
    }

    #[tokio::test]
    async fn default_write_goes_through_when_nothing_newer_landed() {
        let rig = Rig::started().await;
        let cache = &rig.system.assignments;
        let player = PlayerId::new();
        cache.on_connect(player, "Oli").await;
        rig.settle().await;

        let seq = cache.next_write();
        let default = StoredAssignment {
            player,
            group_name: Some("Default".into()),
            expires_at: None,
        };
        assert!(cache.store_default(&default, seq).await.unwrap());
    }

    #[tokio::test]
    async fn load_failure_falls_back_to_default() {
        let rig = Rig::started().await;
        let player = PlayerId::new();
        rig.gateway.fail(GatewayOp::GetAssignment);

        let resolution = rig.system.assignments.on_connect(player, "Ana").await;
        assert_eq!(resolution, ConnectResolution::DefaultAssigned);
        assert_eq!(rig.system.assignments.resolve(player).unwrap().name, "Default");
    }

    #[tokio::test]
    async fn load_for_departed_session_is_discarded() {
        let rig = Rig::started().await;
        let cache = rig.system.assignments.clone();
        let player = PlayerId::new();
        rig.gateway.set_latency(Duration::from_millis(30));

        let connect = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.on_connect(player, "Quick").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.on_disconnect(player).await;

        assert_eq!(connect.await.unwrap(), ConnectResolution::Discarded);
        assert!(cache.assignment(player).is_none());
        assert!(rig.applier.effects(player).is_none());
    }

    #[tokio::test]
    async fn offline_target_is_persisted_only() {
        let rig = Rig::started().await;
        let player = PlayerId::new();
        rig.system.registry.create("vip", "&6").await;

        assert_eq!(
            rig.system
                .assignments
                .assign(player, "vip", AssignmentTerm::Permanent)
                .await,
            AssignOutcome::Ok
        );
        assert!(rig.applier.effects(player).is_none());
        assert!(rig.applier.notices_for(player).is_empty());
        assert_eq!(
            rig.gateway.stored_assignment(player).unwrap().group_name.as_deref(),
            Some("vip")
        );
    }

    #[tokio::test]
    async fn prefix_change_refreshes_holders_only() {
        let rig = Rig::started().await;
        let cache = &rig.system.assignments;
        let holder = PlayerId::new();
        let other = PlayerId::new();
        rig.system.registry.create("vip", "&6").await;
        cache.on_connect(holder, "Holder").await;
        cache.on_connect(other, "Other").await;
        cache.assign(holder, "vip", AssignmentTerm::Permanent).await;
        let other_applies = rig.applier.apply_count(other);

        assert_eq!(
            rig.system.registry.set_prefix("VIP", "&e[VIP]").await,
            PrefixOutcome::Updated
        );
        assert_eq!(
            rig.applier.effects(holder).unwrap().display_name,
            "§e[VIP]Holder"
        );
        assert_eq!(rig.applier.apply_count(other), other_applies);
    }

    #[tokio::test]
    async fn info_reports_remaining_time() {
        let rig = Rig::started().await;
        let cache = &rig.system.assignments;
        let player = PlayerId::new();
        rig.system.registry.create("vip", "&6[VIP]").await;
        cache.on_connect(player, "Ivy").await;

        let info = cache.info(player).unwrap();
        assert_eq!(info.group, "Default");
        assert_eq!(info.remaining, "Permanent");

        cache
            .assign(player, "vip", AssignmentTerm::Temporary(Duration::from_secs(90)))
            .await;
        let info = cache.info(player).unwrap();
        assert_eq!(info.group, "vip");
        assert_eq!(info.prefix, "§6[VIP]");
        assert_eq!(info.remaining, "1m 30s");

        assert!(cache.info(PlayerId::new()).is_none());
    }
}
