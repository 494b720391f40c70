//! # Rank Core
//!
//! Time-scoped group memberships for a live session server, the session
//! effects they imply, and world-placed info signs that show them.
//!
//! ## Core Features
//!
//! - **Group Registry**: case-insensitive group definitions with a protected default
//! - **Assignment Cache**: live assignments of connected players, with expiry
//! - **Info Signs**: sign positions bound to players and re-rendered on change
//! - **Pluggable Storage**: an async gateway trait with an in-memory backend
//! - **Main Context**: every cache write and host effect runs on one serialized queue
//!
//! ## Architecture Overview
//!
//! Storage I/O runs on the tokio worker pool. Its results are handed to the
//! main context through [`MainHandle`] before they touch a cache or reach
//! the host. Hosts plug in through two traits: [`VisualEffectApplier`] for
//! player sessions and [`SurfaceWorld`] for signs.
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rank_core::{
//!     main_context, AssignmentTerm, MemoryGateway, PlayerId, RankSettings, RankSystem,
//!     SessionEffects, ShutdownState, SurfaceId, SurfaceProbe, SurfaceWorld, SystemClock,
//!     VisualEffectApplier,
//! };
//!
//! struct Host;
//!
//! impl VisualEffectApplier for Host {
//!     fn apply(&self, _player: PlayerId, _effects: &SessionEffects) {}
//!     fn release(&self, _player: PlayerId) {}
//!     fn notify(&self, _player: PlayerId, _message: &str) {}
//! }
//!
//! impl SurfaceWorld for Host {
//!     fn probe(&self, _surface: &SurfaceId) -> SurfaceProbe { SurfaceProbe::Unloaded }
//!     fn write_lines(&self, _surface: &SurfaceId, _lines: &[String; 4]) {}
//!     fn player_name(&self, _player: PlayerId) -> Option<String> { None }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let (main, main_loop) = main_context();
//!     let shutdown = ShutdownState::new();
//!     tokio::spawn(main_loop.run(shutdown.clone(), Duration::from_millis(50)));
//!
//!     let host = Arc::new(Host);
//!     let system = RankSystem::new(
//!         &RankSettings::default(),
//!         Arc::new(MemoryGateway::new()),
//!         host.clone(),
//!         host,
//!         Arc::new(SystemClock),
//!         main,
//!     );
//!     system.start(Vec::new()).await;
//!
//!     let player = PlayerId::new();
//!     system.on_connect(player, "Steve").await;
//!     system.create_group("Vip", "&6[VIP]").await;
//!     system.assign(player, "vip", AssignmentTerm::Permanent).await;
//!
//!     shutdown.initiate_shutdown();
//! }
//! ```

pub mod assignments;
pub mod clock;
pub mod config;
pub mod duration;
pub mod effects;
pub mod error;
pub mod format;
pub mod gateway;
pub mod listener;
pub mod main_context;
pub mod markup;
pub mod outcome;
pub mod registry;
pub mod shutdown;
pub mod surfaces;
pub mod system;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use assignments::{AssignmentCache, GroupInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DisplaySettings, GroupSettings, MessageSettings, RankSettings};
pub use duration::{format_duration, parse_duration};
pub use effects::{SessionEffects, Sidebar, SurfaceProbe, SurfaceWorld, VisualEffectApplier};
pub use error::{GatewayError, MainContextClosed, TermOutOfRange};
pub use format::{ExpiryDisplay, Formatter, Placeholders};
pub use gateway::{GatewayOp, MemoryGateway, PersistenceGateway};
pub use listener::RankListener;
pub use main_context::{is_main_context, main_context, MainHandle, MainLoop};
pub use outcome::{AssignOutcome, ConnectResolution, CreateOutcome, DeleteOutcome, PrefixOutcome};
pub use registry::GroupRegistry;
pub use shutdown::ShutdownState;
pub use surfaces::{DisplaySurfaceIndex, RenderResult, RenderSummary};
pub use system::{RankSystem, StartReport, TimerSettings};
pub use types::{
    Assignment, AssignmentTerm, GroupDefinition, GroupKey, PlayerId, StoredAssignment,
    SurfaceBinding, SurfaceId,
};
