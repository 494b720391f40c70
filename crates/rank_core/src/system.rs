//! # Rank System
//!
//! Wires the registry, the assignment cache and the info sign index
//! together and exposes the operations hosts call. Nothing here is global;
//! every collaborator is passed in at construction.
//!
//! ## Startup
//!
//! 1. `init_schema` on the gateway
//! 2. load groups (creating the default if needed)
//! 3. load info sign bindings
//! 4. connect players who were already online
//!
//! ## Background work
//!
//! [`RankSystem::spawn_timers`] starts the expiry sweep and the periodic
//! sign refresh. Both stop once shutdown is initiated.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::assignments::{AssignmentCache, GroupInfo};
use crate::clock::Clock;
use crate::config::RankSettings;
use crate::effects::{SurfaceWorld, VisualEffectApplier};
use crate::error::MainContextClosed;
use crate::format::Formatter;
use crate::gateway::PersistenceGateway;
use crate::listener::RankListener;
use crate::main_context::MainHandle;
use crate::outcome::{
    AssignOutcome, ConnectResolution, CreateOutcome, DeleteOutcome, PrefixOutcome,
};
use crate::registry::GroupRegistry;
use crate::shutdown::ShutdownState;
use crate::surfaces::{DisplaySurfaceIndex, RenderResult};
use crate::types::{AssignmentTerm, GroupDefinition, PlayerId, SurfaceId};

/// Cadence of the background timers.
#[derive(Debug, Clone, Copy)]
pub struct TimerSettings {
    pub sweep_interval: Duration,
    /// `None` disables the periodic sign refresh.
    pub sign_refresh_interval: Option<Duration>,
}

/// What startup achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartReport {
    pub groups_loaded: bool,
    pub signs_loaded: bool,
    pub players_connected: usize,
}

pub struct RankSystem {
    pub registry: Arc<GroupRegistry>,
    pub assignments: Arc<AssignmentCache>,
    pub surfaces: Arc<DisplaySurfaceIndex>,
    pub formatter: Arc<Formatter>,
    gateway: Arc<dyn PersistenceGateway>,
    main: MainHandle,
}

impl RankSystem {
    pub fn new(
        settings: &RankSettings,
        gateway: Arc<dyn PersistenceGateway>,
        applier: Arc<dyn VisualEffectApplier>,
        world: Arc<dyn SurfaceWorld>,
        clock: Arc<dyn Clock>,
        main: MainHandle,
    ) -> Self {
        let formatter = Arc::new(Formatter::new(settings));
        let registry = GroupRegistry::new(&settings.groups, Arc::clone(&gateway), main.clone());
        let assignments = AssignmentCache::new(
            Arc::clone(&registry),
            Arc::clone(&gateway),
            main.clone(),
            Arc::clone(&clock),
            applier,
            Arc::clone(&formatter),
        );
        let surfaces = DisplaySurfaceIndex::new(
            Arc::clone(&assignments),
            Arc::clone(&registry),
            Arc::clone(&gateway),
            main.clone(),
            world,
            Arc::clone(&formatter),
            clock,
        );

        // Prefix changes reach sessions before signs.
        let cache_listener: Arc<dyn RankListener> = assignments.clone();
        let surface_listener: Arc<dyn RankListener> = surfaces.clone();
        registry.subscribe(Arc::downgrade(&cache_listener));
        registry.subscribe(Arc::downgrade(&surface_listener));
        assignments.subscribe(Arc::downgrade(&surface_listener));

        Self {
            registry,
            assignments,
            surfaces,
            formatter,
            gateway,
            main,
        }
    }

    pub fn main_handle(&self) -> &MainHandle {
        &self.main
    }

    /// Loads persisted state and connects players already online.
    pub async fn start(&self, online: Vec<(PlayerId, String)>) -> StartReport {
        info!("🔧 Starting rank system on {} storage", self.gateway.backend_name());
        if let Err(e) = self.gateway.init_schema().await {
            error!("❌ Failed to prepare {} schema: {}", self.gateway.backend_name(), e);
        }

        let groups_loaded = self.registry.load().await;
        let signs_loaded = self.surfaces.load().await;

        let connects = online
            .iter()
            .map(|(player, name)| self.assignments.on_connect(*player, name));
        let players_connected = join_all(connects)
            .await
            .into_iter()
            .filter(|resolution| *resolution != ConnectResolution::Discarded)
            .count();

        info!(
            "✅ Rank system ready: {} group(s), {} info sign(s), {} player(s) online",
            self.registry.len(),
            self.surfaces.len(),
            players_connected
        );
        StartReport {
            groups_loaded,
            signs_loaded,
            players_connected,
        }
    }

    /// Starts the expiry sweep and, if enabled, the sign refresh.
    pub fn spawn_timers(&self, timers: TimerSettings, shutdown: ShutdownState) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        let assignments = Arc::clone(&self.assignments);
        let sweep_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let period = timers.sweep_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if sweep_shutdown.is_shutdown_initiated() {
                    info!("⌛ Expiry sweep stopping - shutdown initiated");
                    break;
                }
                assignments.sweep().await;
            }
        }));

        if let Some(period) = timers.sign_refresh_interval {
            let surfaces = Arc::clone(&self.surfaces);
            let main = self.main.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if shutdown.is_shutdown_initiated() {
                        info!("🪧 Sign refresh stopping - shutdown initiated");
                        break;
                    }
                    let surfaces = Arc::clone(&surfaces);
                    if !main.run(move || {
                        surfaces.render_all();
                    }) {
                        break;
                    }
                }
            }));
        }

        handles
    }

    /// Releases every session and closes storage.
    pub async fn shutdown(&self) {
        let released = self.assignments.release_all().await;
        info!("👋 Released {} session(s)", released);
        self.gateway.close().await;
        info!("✅ {} storage closed", self.gateway.backend_name());
    }

    // ------------------------------------------------------------------
    // Administrative operations
    // ------------------------------------------------------------------

    pub async fn create_group(&self, name: &str, raw_prefix: &str) -> CreateOutcome {
        self.registry.create(name, raw_prefix).await
    }

    pub async fn delete_group(&self, name: &str) -> DeleteOutcome {
        self.registry.delete(name).await
    }

    pub async fn set_prefix(&self, name: &str, raw_prefix: &str) -> PrefixOutcome {
        self.registry.set_prefix(name, raw_prefix).await
    }

    pub async fn assign(&self, player: PlayerId, group: &str, term: AssignmentTerm) -> AssignOutcome {
        self.assignments.assign(player, group, term).await
    }

    pub fn groups(&self) -> Vec<GroupDefinition> {
        self.registry.all()
    }

    pub fn group_info(&self, player: PlayerId) -> Option<GroupInfo> {
        self.assignments.info(player)
    }

    // ------------------------------------------------------------------
    // Host events
    // ------------------------------------------------------------------

    pub async fn on_connect(&self, player: PlayerId, name: &str) -> ConnectResolution {
        self.assignments.on_connect(player, name).await
    }

    pub async fn on_disconnect(&self, player: PlayerId) -> bool {
        self.assignments.on_disconnect(player).await
    }

    /// Binds a sign from outside the main context.
    pub async fn bind(&self, surface: SurfaceId, player: PlayerId) -> Result<RenderResult, MainContextClosed> {
        let surfaces = Arc::clone(&self.surfaces);
        self.main.call(move || surfaces.bind(surface, player)).await
    }

    /// Unbinds a sign from outside the main context.
    pub async fn unbind(&self, surface: SurfaceId) -> Result<bool, MainContextClosed> {
        let surfaces = Arc::clone(&self.surfaces);
        self.main.call(move || surfaces.unbind(&surface)).await
    }

    pub fn is_bound(&self, surface: &SurfaceId) -> bool {
        self.surfaces.is_bound(surface)
    }
}
