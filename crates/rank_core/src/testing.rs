//! Recording fakes and a wired-up system for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::clock::{Clock, ManualClock};
use crate::config::RankSettings;
use crate::effects::{SessionEffects, SurfaceProbe, SurfaceWorld, VisualEffectApplier};
use crate::gateway::MemoryGateway;
use crate::main_context::{is_main_context, main_context, MainHandle};
use crate::shutdown::ShutdownState;
use crate::system::RankSystem;
use crate::types::{PlayerId, SurfaceId};

#[derive(Default)]
pub(crate) struct RecordingApplier {
    applied: Mutex<HashMap<PlayerId, SessionEffects>>,
    apply_counts: Mutex<HashMap<PlayerId, usize>>,
    notices: Mutex<Vec<(PlayerId, String)>>,
    released: Mutex<Vec<PlayerId>>,
}

impl RecordingApplier {
    pub fn effects(&self, player: PlayerId) -> Option<SessionEffects> {
        self.applied.lock().unwrap().get(&player).cloned()
    }

    pub fn apply_count(&self, player: PlayerId) -> usize {
        self.apply_counts.lock().unwrap().get(&player).copied().unwrap_or(0)
    }

    pub fn notices_for(&self, player: PlayerId) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == player)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn was_released(&self, player: PlayerId) -> bool {
        self.released.lock().unwrap().contains(&player)
    }
}

impl VisualEffectApplier for RecordingApplier {
    fn apply(&self, player: PlayerId, effects: &SessionEffects) {
        assert!(is_main_context(), "effects applied off the main context");
        self.applied.lock().unwrap().insert(player, effects.clone());
        *self.apply_counts.lock().unwrap().entry(player).or_insert(0) += 1;
    }

    fn release(&self, player: PlayerId) {
        assert!(is_main_context(), "session released off the main context");
        self.applied.lock().unwrap().remove(&player);
        self.released.lock().unwrap().push(player);
    }

    fn notify(&self, player: PlayerId, message: &str) {
        self.notices.lock().unwrap().push((player, message.to_string()));
    }
}

/// A world holding signs keyed by position; `None` marks a non-sign block.
#[derive(Default)]
pub(crate) struct FakeWorld {
    signs: Mutex<HashMap<SurfaceId, Option<[String; 4]>>>,
    unloaded: Mutex<HashSet<SurfaceId>>,
    names: Mutex<HashMap<PlayerId, String>>,
    writes: Mutex<usize>,
}

impl FakeWorld {
    pub fn place_sign(&self, surface: SurfaceId) {
        self.signs
            .lock()
            .unwrap()
            .insert(surface, Some(Default::default()));
    }

    pub fn break_sign(&self, surface: &SurfaceId) {
        self.signs.lock().unwrap().insert(surface.clone(), None);
    }

    pub fn unload(&self, surface: &SurfaceId) {
        self.unloaded.lock().unwrap().insert(surface.clone());
    }

    pub fn set_name(&self, player: PlayerId, name: &str) {
        self.names.lock().unwrap().insert(player, name.to_string());
    }

    pub fn lines(&self, surface: &SurfaceId) -> Option<[String; 4]> {
        self.signs.lock().unwrap().get(surface).cloned().flatten()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

impl SurfaceWorld for FakeWorld {
    fn probe(&self, surface: &SurfaceId) -> SurfaceProbe {
        if self.unloaded.lock().unwrap().contains(surface) {
            return SurfaceProbe::Unloaded;
        }
        match self.signs.lock().unwrap().get(surface) {
            Some(Some(lines)) => SurfaceProbe::Sign(lines.clone()),
            Some(None) => SurfaceProbe::NotASign,
            None => SurfaceProbe::Unloaded,
        }
    }

    fn write_lines(&self, surface: &SurfaceId, lines: &[String; 4]) {
        assert!(is_main_context(), "sign written off the main context");
        self.signs
            .lock()
            .unwrap()
            .insert(surface.clone(), Some(lines.clone()));
        *self.writes.lock().unwrap() += 1;
    }

    fn player_name(&self, player: PlayerId) -> Option<String> {
        self.names.lock().unwrap().get(&player).cloned()
    }
}

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// A fully wired system over in-memory fakes with a running main loop.
pub(crate) struct Rig {
    pub system: RankSystem,
    pub gateway: Arc<MemoryGateway>,
    pub applier: Arc<RecordingApplier>,
    pub world: Arc<FakeWorld>,
    pub clock: Arc<ManualClock>,
    pub main: MainHandle,
    pub shutdown: ShutdownState,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_settings(RankSettings::default())
    }

    pub fn with_settings(settings: RankSettings) -> Self {
        let gateway = Arc::new(MemoryGateway::new());
        let applier = Arc::new(RecordingApplier::default());
        let world = Arc::new(FakeWorld::default());
        let clock = Arc::new(ManualClock::new(epoch()));
        let (main, main_loop) = main_context();
        let shutdown = ShutdownState::new();
        tokio::spawn(main_loop.run(shutdown.clone(), Duration::from_millis(5)));

        let system = RankSystem::new(
            &settings,
            gateway.clone(),
            applier.clone(),
            world.clone(),
            clock.clone() as Arc<dyn Clock>,
            main.clone(),
        );

        Self {
            system,
            gateway,
            applier,
            world,
            clock,
            main,
            shutdown,
        }
    }

    /// A rig whose groups and signs have been loaded.
    pub async fn started() -> Self {
        let rig = Self::new();
        rig.system.start(Vec::new()).await;
        rig
    }

    /// Lets background persists and fetches finish and their hand-offs run.
    pub async fn settle(&self) {
        for _ in 0..2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.main.flush().await.unwrap();
        }
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.shutdown.initiate_shutdown();
    }
}
