//! # Group Registry
//!
//! The authoritative in-memory set of group definitions and the only writer
//! of them. Reads ([`GroupRegistry::get`], [`GroupRegistry::all`]) are
//! lock-free lookups that never touch storage. Mutations persist first and
//! commit on the main context only after storage acknowledged them.
//!
//! ## Serialization
//!
//! Create, delete and prefix updates reserve their group key on the main
//! context before any I/O starts. A second mutation of the same key while
//! one is in flight is refused, so two concurrent creates of one name can
//! never both succeed.
//!
//! ## Default group
//!
//! The configured default must always exist. It is created after every load
//! when missing, and again whenever a lookup finds it gone. If that fails
//! the registry logs a CRITICAL error and keeps serving what it has.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::config::GroupSettings;
use crate::error::GatewayError;
use crate::gateway::PersistenceGateway;
use crate::listener::{Listeners, RankListener};
use crate::main_context::{is_main_context, MainHandle};
use crate::outcome::{CreateOutcome, DeleteOutcome, PrefixOutcome};
use crate::types::{GroupDefinition, GroupKey};

/// Why a mutation could not claim a group key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    NotFound,
    IsDefault,
    Busy,
}

pub struct GroupRegistry {
    groups: DashMap<GroupKey, GroupDefinition>,
    in_flight: DashMap<GroupKey, ()>,
    default_name: String,
    default_prefix: String,
    gateway: Arc<dyn PersistenceGateway>,
    main: MainHandle,
    listeners: Listeners,
    repairing_default: AtomicBool,
}

impl GroupRegistry {
    pub fn new(
        settings: &GroupSettings,
        gateway: Arc<dyn PersistenceGateway>,
        main: MainHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            groups: DashMap::new(),
            in_flight: DashMap::new(),
            default_name: settings.default_group.clone(),
            default_prefix: settings.default_prefix.clone(),
            gateway,
            main,
            listeners: Listeners::default(),
            repairing_default: AtomicBool::new(false),
        })
    }

    /// Registers for prefix change notifications.
    pub fn subscribe(&self, listener: Weak<dyn RankListener>) {
        self.listeners.subscribe(listener);
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn is_default(&self, name: &str) -> bool {
        GroupKey::new(name) == GroupKey::new(&self.default_name)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<GroupDefinition> {
        self.groups
            .get(&GroupKey::new(name))
            .map(|group| group.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.contains_key(&GroupKey::new(name))
    }

    /// Point-in-time snapshot, ordered by name.
    pub fn all(&self) -> Vec<GroupDefinition> {
        let mut groups: Vec<GroupDefinition> =
            self.groups.iter().map(|entry| entry.value().clone()).collect();
        groups.sort_by_key(|group| group.key());
        groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The default group, or `None` after scheduling a repair.
    pub fn default_group(self: &Arc<Self>) -> Option<GroupDefinition> {
        match self.get(&self.default_name) {
            Some(group) => Some(group),
            None => {
                warn!("⚠️ Default group '{}' is missing", self.default_name);
                self.schedule_default_repair();
                None
            }
        }
    }

    /// Replaces the cached set with what storage holds, then makes sure the
    /// default exists.
    ///
    /// # Returns
    ///
    /// `true` when the fetch succeeded and the default group is present.
    pub async fn load(self: &Arc<Self>) -> bool {
        let loaded = match self.gateway.list_groups().await {
            Ok(groups) => {
                let registry = Arc::clone(self);
                self.main
                    .call(move || registry.replace_all(groups))
                    .await
                    .is_ok()
            }
            Err(e) => {
                error!("❌ Failed to load groups from {}: {}", self.gateway.backend_name(), e);
                false
            }
        };

        let default_ok = self.ensure_default_exists().await;
        loaded && default_ok
    }

    /// Creates the configured default group if it is missing.
    pub async fn ensure_default_exists(self: &Arc<Self>) -> bool {
        if self.contains(&self.default_name) {
            return true;
        }

        warn!(
            "🔧 Default group '{}' not found, creating it with prefix '{}'",
            self.default_name, self.default_prefix
        );
        let name = self.default_name.clone();
        let prefix = self.default_prefix.clone();
        match self.create(&name, &prefix).await {
            CreateOutcome::Created | CreateOutcome::AlreadyExists => true,
            CreateOutcome::Failed => {
                error!(
                    "❌ CRITICAL: could not create default group '{}'; players without a valid group cannot be resolved",
                    self.default_name
                );
                false
            }
        }
    }

    /// Creates a group after storage accepted it.
    pub async fn create(self: &Arc<Self>, name: &str, raw_prefix: &str) -> CreateOutcome {
        let group = GroupDefinition::new(name.trim(), raw_prefix);
        let key = group.key();

        let registry = Arc::clone(self);
        let reserve_key = key.clone();
        match self
            .main
            .call(move || registry.reserve_new(reserve_key))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("Group '{}' already exists or is being created", group.name);
                return CreateOutcome::AlreadyExists;
            }
            Err(_) => return CreateOutcome::Failed,
        }

        let registry = Arc::clone(self);
        let persist = tokio::spawn(async move {
            let persisted = registry.gateway.save_group(&group).await;
            let committer = Arc::clone(&registry);
            registry
                .main
                .call(move || committer.commit_create(group, persisted))
                .await
                .unwrap_or(CreateOutcome::Failed)
        });
        persist.await.unwrap_or(CreateOutcome::Failed)
    }

    /// Deletes a group after storage accepted the deletion.
    ///
    /// Assignments naming the group are nulled by storage; connected players
    /// keep their cached assignment until they reconnect.
    pub async fn delete(self: &Arc<Self>, name: &str) -> DeleteOutcome {
        let key = GroupKey::new(name);
        let registry = Arc::clone(self);
        let claim_key = key.clone();
        let group = match self
            .main
            .call(move || registry.claim(&claim_key, false))
            .await
        {
            Ok(Ok(group)) => group,
            Ok(Err(Refusal::NotFound)) => return DeleteOutcome::NotFound,
            Ok(Err(Refusal::IsDefault)) => {
                warn!("⚠️ Refusing to delete default group '{}'", name);
                return DeleteOutcome::IsDefault;
            }
            Ok(Err(Refusal::Busy)) | Err(_) => return DeleteOutcome::Failed,
        };

        let registry = Arc::clone(self);
        let persist = tokio::spawn(async move {
            let persisted = registry.gateway.delete_group(&group.name).await;
            let committer = Arc::clone(&registry);
            registry
                .main
                .call(move || committer.commit_delete(group, persisted))
                .await
                .unwrap_or(DeleteOutcome::Failed)
        });
        persist.await.unwrap_or(DeleteOutcome::Failed)
    }

    /// Changes a group's prefix and notifies listeners.
    pub async fn set_prefix(self: &Arc<Self>, name: &str, raw_prefix: &str) -> PrefixOutcome {
        let key = GroupKey::new(name);
        let registry = Arc::clone(self);
        let claim_key = key.clone();
        let current = match self
            .main
            .call(move || registry.claim(&claim_key, true))
            .await
        {
            Ok(Ok(group)) => group,
            Ok(Err(Refusal::NotFound)) => return PrefixOutcome::NotFound,
            Ok(Err(_)) | Err(_) => return PrefixOutcome::Failed,
        };

        let updated = GroupDefinition::new(current.name, raw_prefix);
        let registry = Arc::clone(self);
        let persist = tokio::spawn(async move {
            let persisted = registry.gateway.save_group(&updated).await;
            let committer = Arc::clone(&registry);
            registry
                .main
                .call(move || committer.commit_prefix(updated, persisted))
                .await
                .unwrap_or(PrefixOutcome::Failed)
        });
        persist.await.unwrap_or(PrefixOutcome::Failed)
    }

    // ------------------------------------------------------------------
    // Main-context steps
    // ------------------------------------------------------------------

    fn replace_all(&self, groups: Vec<GroupDefinition>) {
        debug_assert!(is_main_context());
        self.groups.clear();
        for group in groups {
            self.groups.insert(group.key(), group);
        }
        info!("📋 Loaded {} group(s)", self.groups.len());
    }

    fn reserve_new(&self, key: GroupKey) -> bool {
        debug_assert!(is_main_context());
        if self.groups.contains_key(&key) || self.in_flight.contains_key(&key) {
            return false;
        }
        self.in_flight.insert(key, ());
        true
    }

    fn claim(&self, key: &GroupKey, allow_default: bool) -> Result<GroupDefinition, Refusal> {
        debug_assert!(is_main_context());
        if !allow_default && *key == GroupKey::new(&self.default_name) {
            return Err(Refusal::IsDefault);
        }
        if self.in_flight.contains_key(key) {
            warn!("⚠️ Another change to group '{}' is still in flight", key);
            return Err(Refusal::Busy);
        }
        let group = self
            .groups
            .get(key)
            .map(|group| group.clone())
            .ok_or(Refusal::NotFound)?;
        self.in_flight.insert(key.clone(), ());
        Ok(group)
    }

    fn commit_create(
        &self,
        group: GroupDefinition,
        persisted: Result<(), GatewayError>,
    ) -> CreateOutcome {
        debug_assert!(is_main_context());
        self.in_flight.remove(&group.key());
        match persisted {
            Ok(()) => {
                info!("✅ Created group '{}' with prefix '{}'", group.name, group.raw_prefix);
                self.groups.insert(group.key(), group);
                CreateOutcome::Created
            }
            Err(e) => {
                error!("❌ Failed to persist new group '{}': {}", group.name, e);
                CreateOutcome::Failed
            }
        }
    }

    fn commit_delete(
        &self,
        group: GroupDefinition,
        persisted: Result<(), GatewayError>,
    ) -> DeleteOutcome {
        debug_assert!(is_main_context());
        self.in_flight.remove(&group.key());
        match persisted {
            Ok(()) => {
                self.groups.remove(&group.key());
                info!("🗑️ Deleted group '{}'", group.name);
                DeleteOutcome::Deleted
            }
            Err(e) => {
                error!("❌ Failed to delete group '{}': {}", group.name, e);
                DeleteOutcome::Failed
            }
        }
    }

    fn commit_prefix(
        &self,
        updated: GroupDefinition,
        persisted: Result<(), GatewayError>,
    ) -> PrefixOutcome {
        debug_assert!(is_main_context());
        let key = updated.key();
        self.in_flight.remove(&key);
        if let Err(e) = persisted {
            error!("❌ Failed to update prefix of group '{}': {}", updated.name, e);
            return PrefixOutcome::Failed;
        }

        let group = {
            let mut entry = self.groups.entry(key).or_insert_with(|| updated.clone());
            entry.raw_prefix = updated.raw_prefix.clone();
            entry.clone()
        };
        info!("🎨 Prefix of group '{}' set to '{}'", group.name, group.raw_prefix);

        self.listeners.notify(|listener| listener.group_updated(&group));
        PrefixOutcome::Updated
    }

    fn schedule_default_repair(self: &Arc<Self>) {
        if self.repairing_default.swap(true, Ordering::AcqRel) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let registry = Arc::clone(self);
                runtime.spawn(async move {
                    registry.ensure_default_exists().await;
                    registry.repairing_default.store(false, Ordering::Release);
                });
            }
            Err(_) => self.repairing_default.store(false, Ordering::Release),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayOp, MemoryGateway};
    use crate::main_context::main_context;
    use crate::shutdown::ShutdownState;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Harness {
        registry: Arc<GroupRegistry>,
        gateway: Arc<MemoryGateway>,
        main: MainHandle,
        shutdown: ShutdownState,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.shutdown.initiate_shutdown();
        }
    }

    fn harness() -> Harness {
        let gateway = Arc::new(MemoryGateway::new());
        let (main, main_loop) = main_context();
        let shutdown = ShutdownState::new();
        tokio::spawn(main_loop.run(shutdown.clone(), Duration::from_millis(5)));
        let registry = GroupRegistry::new(&GroupSettings::default(), gateway.clone(), main.clone());
        Harness {
            registry,
            gateway,
            main,
            shutdown,
        }
    }

    #[derive(Default)]
    struct PrefixRecorder {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl RankListener for PrefixRecorder {
        fn group_updated(&self, group: &GroupDefinition) {
            assert!(is_main_context());
            self.seen
                .lock()
                .unwrap()
                .push((group.name.clone(), group.raw_prefix.clone()));
        }
    }

    #[tokio::test]
    async fn load_creates_missing_default() {
        let h = harness();
        assert!(h.registry.load().await);

        let default = h.registry.get("default").unwrap();
        assert_eq!(default.name, "Default");
        assert_eq!(default.raw_prefix, "&7");
        assert!(h.gateway.stored_group("Default").is_some());
    }

    #[tokio::test]
    async fn load_replaces_cached_groups() {
        let h = harness();
        h.gateway
            .save_group(&GroupDefinition::new("Default", "&8"))
            .await
            .unwrap();
        h.gateway
            .save_group(&GroupDefinition::new("Vip", "&6[VIP]"))
            .await
            .unwrap();

        assert!(h.registry.load().await);
        let names: Vec<String> = h.registry.all().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["Default".to_string(), "Vip".to_string()]);
        assert_eq!(h.registry.get("DEFAULT").unwrap().raw_prefix, "&8");
    }

    #[tokio::test]
    async fn failed_load_keeps_existing_groups() {
        let h = harness();
        assert_eq!(h.registry.create("Vip", "&6").await, CreateOutcome::Created);
        h.gateway.fail(GatewayOp::ListGroups);

        assert!(!h.registry.load().await);
        assert!(h.registry.contains("vip"));
        assert!(h.registry.contains("default"));
    }

    #[tokio::test]
    async fn create_then_duplicate_ignoring_case() {
        let h = harness();
        assert_eq!(
            h.registry.create("Admin", "&c[Admin]").await,
            CreateOutcome::Created
        );
        let saves = h.gateway.calls(GatewayOp::SaveGroup);

        assert_eq!(
            h.registry.create("admin", "&4[X]").await,
            CreateOutcome::AlreadyExists
        );
        assert_eq!(h.gateway.calls(GatewayOp::SaveGroup), saves);

        let admin = h.registry.get("ADMIN").unwrap();
        assert_eq!(admin.raw_prefix, "&c[Admin]");
        assert_eq!(admin.prefix(), "§c[Admin]");
        assert_eq!(admin.plain_prefix(), "[Admin]");
    }

    #[tokio::test]
    async fn concurrent_creates_of_one_name_yield_one_winner() {
        let h = harness();
        h.gateway.set_latency(Duration::from_millis(20));

        let first = {
            let registry = h.registry.clone();
            tokio::spawn(async move { registry.create("Builder", "&a").await })
        };
        let second = {
            let registry = h.registry.clone();
            tokio::spawn(async move { registry.create("BUILDER", "&b").await })
        };

        let mut outcomes = vec![first.await.unwrap(), second.await.unwrap()];
        outcomes.sort_by_key(|o| *o as u8);
        assert_eq!(
            outcomes,
            vec![CreateOutcome::Created, CreateOutcome::AlreadyExists]
        );
        assert_eq!(h.gateway.calls(GatewayOp::SaveGroup), 1);
    }

    #[tokio::test]
    async fn failed_persist_leaves_cache_unchanged() {
        let h = harness();
        h.gateway.fail(GatewayOp::SaveGroup);
        assert_eq!(h.registry.create("Vip", "&6").await, CreateOutcome::Failed);
        assert!(h.registry.get("vip").is_none());

        h.gateway.recover(GatewayOp::SaveGroup);
        assert_eq!(h.registry.create("Vip", "&6").await, CreateOutcome::Created);
    }

    #[tokio::test]
    async fn delete_rules() {
        let h = harness();
        h.registry.load().await;
        h.registry.create("Mod", "&9").await;

        assert_eq!(h.registry.delete("default").await, DeleteOutcome::IsDefault);
        assert_eq!(h.registry.delete("ghost").await, DeleteOutcome::NotFound);

        h.gateway.fail(GatewayOp::DeleteGroup);
        assert_eq!(h.registry.delete("mod").await, DeleteOutcome::Failed);
        assert!(h.registry.contains("Mod"));

        h.gateway.recover(GatewayOp::DeleteGroup);
        assert_eq!(h.registry.delete("MOD").await, DeleteOutcome::Deleted);
        assert!(!h.registry.contains("Mod"));
        assert!(h.gateway.stored_group("Mod").is_none());
    }

    #[tokio::test]
    async fn set_prefix_updates_in_place_and_notifies() {
        let h = harness();
        let recorder = Arc::new(PrefixRecorder::default());
        let listener: Arc<dyn RankListener> = recorder.clone();
        h.registry.subscribe(Arc::downgrade(&listener));

        h.registry.create("Vip", "&6").await;
        assert_eq!(
            h.registry.set_prefix("vip", "&e[VIP]").await,
            PrefixOutcome::Updated
        );
        assert_eq!(h.registry.get("Vip").unwrap().raw_prefix, "&e[VIP]");
        assert_eq!(h.gateway.stored_group("vip").unwrap().raw_prefix, "&e[VIP]");
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![("Vip".to_string(), "&e[VIP]".to_string())]
        );

        assert_eq!(
            h.registry.set_prefix("ghost", "&0").await,
            PrefixOutcome::NotFound
        );

        h.gateway.fail(GatewayOp::SaveGroup);
        assert_eq!(h.registry.set_prefix("vip", "&0").await, PrefixOutcome::Failed);
        assert_eq!(h.registry.get("Vip").unwrap().raw_prefix, "&e[VIP]");
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_default_is_repaired_on_lookup() {
        let h = harness();
        assert!(h.registry.default_group().is_none());

        for _ in 0..50 {
            if h.registry.contains("Default") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.main.flush().await.unwrap();
        assert!(h.registry.default_group().is_some());
    }

    #[tokio::test]
    async fn unrepairable_default_degrades_without_panicking() {
        let h = harness();
        h.gateway.fail(GatewayOp::SaveGroup);
        assert!(!h.registry.load().await);
        assert!(h.registry.default_group().is_none());
    }
}
