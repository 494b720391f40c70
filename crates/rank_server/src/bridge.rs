//! Host event bridge.
//!
//! The host (game server, proxy, test harness) writes one JSON event per
//! line to our stdin and reads one JSON command per line from our stdout.
//!
//! ## Inbound events
//!
//! ```json
//! {"event":"player_joined","player":"1c4f...","name":"Steve"}
//! {"event":"set_group","player":"Steve","group":"vip","duration":"7d"}
//! {"event":"sign_placed","surface":{"world":"world","x":1,"y":64,"z":-3},"lines":["[GroupInfo]","Steve","",""]}
//! ```
//!
//! ## Outbound commands
//!
//! Session effects, notices and sign text are pushed back as commands, and
//! every administrative event gets a `reply` carrying its outcome.

use std::sync::Arc;

use dashmap::DashMap;
use rank_core::markup;
use rank_core::{
    parse_duration, AssignmentTerm, DisplaySettings, PlayerId, RankSystem, SessionEffects,
    ShutdownState, SurfaceId, SurfaceProbe, SurfaceWorld, VisualEffectApplier,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// An event reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    PlayerJoined {
        player: PlayerId,
        name: String,
    },
    PlayerQuit {
        player: PlayerId,
    },
    SignPlaced {
        surface: SurfaceId,
        #[serde(default)]
        lines: Vec<String>,
    },
    SignBroken {
        surface: SurfaceId,
    },
    CreateGroup {
        name: String,
        #[serde(default)]
        prefix: String,
    },
    DeleteGroup {
        name: String,
    },
    SetPrefix {
        name: String,
        prefix: String,
    },
    /// `player` is a UUID or the name of a player seen this run.
    SetGroup {
        player: String,
        group: String,
        #[serde(default)]
        duration: Option<String>,
    },
    GroupInfo {
        player: PlayerId,
    },
}

impl HostEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HostEvent::PlayerJoined { .. } => "player_joined",
            HostEvent::PlayerQuit { .. } => "player_quit",
            HostEvent::SignPlaced { .. } => "sign_placed",
            HostEvent::SignBroken { .. } => "sign_broken",
            HostEvent::CreateGroup { .. } => "create_group",
            HostEvent::DeleteGroup { .. } => "delete_group",
            HostEvent::SetPrefix { .. } => "set_prefix",
            HostEvent::SetGroup { .. } => "set_group",
            HostEvent::GroupInfo { .. } => "group_info",
        }
    }
}

/// A command for the host to carry out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
    ApplyEffects {
        player: PlayerId,
        effects: SessionEffects,
    },
    Release {
        player: PlayerId,
    },
    Notify {
        player: PlayerId,
        message: String,
    },
    WriteSign {
        surface: SurfaceId,
        lines: [String; 4],
    },
    Reply {
        event: &'static str,
        outcome: Value,
    },
}

/// Sending half of the outbound command stream.
#[derive(Clone)]
pub struct Outbox {
    sender: mpsc::UnboundedSender<HostCommand>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn send(&self, command: HostCommand) {
        if self.sender.send(command).is_err() {
            debug!("Outbound command dropped - writer stopped");
        }
    }
}

/// Writes commands as JSON lines until every [`Outbox`] is dropped.
pub async fn write_commands<W>(
    mut receiver: mpsc::UnboundedReceiver<HostCommand>,
    mut writer: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = receiver.recv().await {
        let mut line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                error!("❌ Failed to encode host command: {}", e);
                continue;
            }
        };
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// The host as seen by the rank components: signs it reported, names of
/// players it reported, and the outbox that carries effects back.
pub struct HostWorld {
    signs: DashMap<SurfaceId, [String; 4]>,
    names: DashMap<PlayerId, String>,
    outbox: Outbox,
}

impl HostWorld {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            signs: DashMap::new(),
            names: DashMap::new(),
            outbox,
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn remember(&self, player: PlayerId, name: &str) {
        self.names.insert(player, name.to_string());
    }

    /// Looks a player up by UUID text or, ignoring case, by a known name.
    pub fn find_player(&self, name_or_id: &str) -> Option<PlayerId> {
        let text = name_or_id.trim();
        if let Ok(player) = PlayerId::from_str(text) {
            return Some(player);
        }
        self.names
            .iter()
            .find(|entry| entry.value().eq_ignore_ascii_case(text))
            .map(|entry| *entry.key())
    }

    pub fn place_sign(&self, surface: SurfaceId, lines: [String; 4]) {
        self.signs.insert(surface, lines);
    }

    pub fn remove_sign(&self, surface: &SurfaceId) {
        self.signs.remove(surface);
    }

    pub fn sign_lines(&self, surface: &SurfaceId) -> Option<[String; 4]> {
        self.signs.get(surface).map(|lines| lines.clone())
    }
}

impl VisualEffectApplier for HostWorld {
    fn apply(&self, player: PlayerId, effects: &SessionEffects) {
        debug!("🎨 {} is now shown as '{}'", player, effects.display_name);
        self.outbox.send(HostCommand::ApplyEffects {
            player,
            effects: effects.clone(),
        });
    }

    fn release(&self, player: PlayerId) {
        self.outbox.send(HostCommand::Release { player });
    }

    fn notify(&self, player: PlayerId, message: &str) {
        self.outbox.send(HostCommand::Notify {
            player,
            message: message.to_string(),
        });
    }
}

impl SurfaceWorld for HostWorld {
    // Signs the host has not reported this run are treated as unloaded, so
    // persisted bindings survive until the host reports otherwise.
    fn probe(&self, surface: &SurfaceId) -> SurfaceProbe {
        match self.signs.get(surface) {
            Some(lines) => SurfaceProbe::Sign(lines.clone()),
            None => SurfaceProbe::Unloaded,
        }
    }

    fn write_lines(&self, surface: &SurfaceId, lines: &[String; 4]) {
        self.signs.insert(surface.clone(), lines.clone());
        self.outbox.send(HostCommand::WriteSign {
            surface: surface.clone(),
            lines: lines.clone(),
        });
    }

    fn player_name(&self, player: PlayerId) -> Option<String> {
        self.names.get(&player).map(|name| name.clone())
    }
}

/// Dispatches host events to the rank system.
pub struct Bridge {
    system: Arc<RankSystem>,
    host: Arc<HostWorld>,
    signs_enabled: bool,
    identifier: String,
}

impl Bridge {
    pub fn new(system: Arc<RankSystem>, host: Arc<HostWorld>, display: &DisplaySettings) -> Self {
        Self {
            system,
            host,
            signs_enabled: display.signs_enabled,
            identifier: markup::strip(&display.sign_identifier).trim().to_lowercase(),
        }
    }

    /// Reads events line by line until EOF or shutdown.
    pub async fn run<R>(&self, mut reader: R, shutdown: ShutdownState) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            if reader.read_until(b'\n', &mut buffer).await? == 0 {
                break;
            }
            if shutdown.is_shutdown_initiated() {
                break;
            }
            // Invalid bytes only spoil their own line.
            let line = String::from_utf8_lossy(&buffer);
            self.handle_line(&line).await;
        }
        info!("📭 Host event stream closed");
        Ok(())
    }

    /// Parses and dispatches one line. Returns false if it was not a valid
    /// event.
    pub async fn handle_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }
        match serde_json::from_str::<HostEvent>(line) {
            Ok(event) => {
                self.dispatch(event).await;
                true
            }
            Err(e) => {
                warn!("⚠️ Ignoring malformed host event '{}': {}", line, e);
                false
            }
        }
    }

    pub async fn dispatch(&self, event: HostEvent) {
        let kind = event.kind();
        debug!("📨 Host event: {}", kind);
        match event {
            HostEvent::PlayerJoined { player, name } => {
                self.host.remember(player, &name);
                let resolution = self.system.on_connect(player, &name).await;
                debug!("{} joined: {:?}", name, resolution);
            }
            HostEvent::PlayerQuit { player } => {
                self.system.on_disconnect(player).await;
            }
            HostEvent::SignPlaced { surface, lines } => {
                let outcome = self.sign_placed(surface, lines).await;
                self.reply(kind, outcome);
            }
            HostEvent::SignBroken { surface } => {
                self.host.remove_sign(&surface);
                let removed = match self.system.unbind(surface).await {
                    Ok(removed) => removed,
                    Err(e) => {
                        error!("❌ Could not unbind sign: {}", e);
                        false
                    }
                };
                if removed {
                    self.reply(kind, json!("unbound"));
                }
            }
            HostEvent::CreateGroup { name, prefix } => {
                let outcome = self.system.create_group(&name, &prefix).await;
                info!("🏷️ create_group {}: {:?}", name, outcome);
                self.reply(kind, to_value(outcome));
            }
            HostEvent::DeleteGroup { name } => {
                let outcome = self.system.delete_group(&name).await;
                info!("🏷️ delete_group {}: {:?}", name, outcome);
                self.reply(kind, to_value(outcome));
            }
            HostEvent::SetPrefix { name, prefix } => {
                let outcome = self.system.set_prefix(&name, &prefix).await;
                info!("🏷️ set_prefix {}: {:?}", name, outcome);
                self.reply(kind, to_value(outcome));
            }
            HostEvent::SetGroup {
                player,
                group,
                duration,
            } => {
                let outcome = self.set_group(&player, &group, duration.as_deref()).await;
                self.reply(kind, outcome);
            }
            HostEvent::GroupInfo { player } => {
                let info = self.system.group_info(player);
                self.reply(kind, to_value(info));
            }
        }
    }

    async fn sign_placed(&self, surface: SurfaceId, lines: Vec<String>) -> Value {
        if !self.signs_enabled {
            return json!("ignored");
        }

        let mut text: [String; 4] = Default::default();
        for (slot, line) in text.iter_mut().zip(lines) {
            *slot = line;
        }

        if markup::strip(&text[0]).trim().to_lowercase() != self.identifier {
            self.host.place_sign(surface, text);
            return json!("ignored");
        }

        let target = text[1].trim().to_string();
        let Some(player) = self.host.find_player(&target) else {
            warn!("⚠️ Info sign at {} names unknown player '{}'", surface, target);
            return json!("unknown_player");
        };

        self.host.place_sign(surface.clone(), text);
        match self.system.bind(surface, player).await {
            Ok(result) => to_value(result),
            Err(e) => {
                error!("❌ Could not bind sign: {}", e);
                json!("failed")
            }
        }
    }

    async fn set_group(&self, player: &str, group: &str, duration: Option<&str>) -> Value {
        let Some(target) = self.host.find_player(player) else {
            warn!("⚠️ set_group: unknown player '{}'", player);
            return json!("player_not_found");
        };

        let term = match duration.map(str::trim) {
            None | Some("") => AssignmentTerm::Permanent,
            Some(text) if text.eq_ignore_ascii_case("permanent") => AssignmentTerm::Permanent,
            Some(text) => match parse_duration(text) {
                Some(length) => AssignmentTerm::Temporary(length),
                None => {
                    warn!("⚠️ set_group: invalid duration '{}'", text);
                    return json!("invalid_duration");
                }
            },
        };

        let outcome = self.system.assign(target, group, term).await;
        info!("🏷️ set_group {} -> {}: {:?}", player, group, outcome);
        to_value(outcome)
    }

    fn reply(&self, event: &'static str, outcome: Value) {
        self.host.outbox().send(HostCommand::Reply { event, outcome });
    }
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
