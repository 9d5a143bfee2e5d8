//! Session command vocabulary and the registry that routes it.
//!
//! Commands are the unit of state synchronization: everything a player
//! does that other participants must observe is expressed as one of the
//! variants below. The registry decides, per command kind, whether the
//! server executes a received command itself or forwards it to the other
//! connected peers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A state-changing command relayed between session participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// A player announced itself after connecting.
    PlayerJoined { player: String },
    /// A player is leaving the session.
    PlayerLeft { player: String },
    /// Free-form chat line.
    ChatMessage { player: String, text: String },
    /// Change the simulation speed for everyone.
    SetSimulationSpeed { speed: u32 },
    /// Pause or resume the simulation for everyone.
    PauseSimulation { paused: bool },
    /// Mirror of a player's cursor position, sent continuously.
    MoveCursor { player: String, x: f32, y: f32 },
    /// A client asks the host for a full world snapshot.
    RequestWorldSnapshot,
    /// Serialized world state pushed to joining clients.
    WorldSnapshot { tick: u64, data: Vec<u8> },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::PlayerJoined { .. } => CommandKind::PlayerJoined,
            Command::PlayerLeft { .. } => CommandKind::PlayerLeft,
            Command::ChatMessage { .. } => CommandKind::ChatMessage,
            Command::SetSimulationSpeed { .. } => CommandKind::SetSimulationSpeed,
            Command::PauseSimulation { .. } => CommandKind::PauseSimulation,
            Command::MoveCursor { .. } => CommandKind::MoveCursor,
            Command::RequestWorldSnapshot => CommandKind::RequestWorldSnapshot,
            Command::WorldSnapshot { .. } => CommandKind::WorldSnapshot,
        }
    }
}

/// Discriminant of a [`Command`], used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    PlayerJoined,
    PlayerLeft,
    ChatMessage,
    SetSimulationSpeed,
    PauseSimulation,
    MoveCursor,
    RequestWorldSnapshot,
    WorldSnapshot,
}

/// How the server handles a received command of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandConfiguration {
    /// `true`: the command is surfaced to the server's session layer and
    /// never forwarded. `false`: the command is relayed to the other
    /// connected peers and not executed locally.
    pub execute_on_server: bool,
}

impl CommandConfiguration {
    pub const EXECUTE_ON_SERVER: CommandConfiguration = CommandConfiguration {
        execute_on_server: true,
    };
    pub const RELAY: CommandConfiguration = CommandConfiguration {
        execute_on_server: false,
    };
}

/// Lookup of the per-kind routing configuration, consulted by the server
/// for every received command.
pub trait CommandRegistry: Send + Sync {
    fn configuration(&self, kind: CommandKind) -> CommandConfiguration;
}

/// Map-backed registry pre-populated with the default routing.
///
/// Control-plane commands (join/leave, snapshot requests) execute on the
/// server; state mirroring commands (chat, cursor, speed, pause,
/// snapshots) are relayed. Kinds without an entry fall back to
/// execute-on-server so the server never forwards traffic it has no
/// routing entry for.
pub struct DefaultCommandRegistry {
    configurations: HashMap<CommandKind, CommandConfiguration>,
}

impl DefaultCommandRegistry {
    pub fn new() -> Self {
        let mut configurations = HashMap::new();
        configurations.insert(CommandKind::PlayerJoined, CommandConfiguration::EXECUTE_ON_SERVER);
        configurations.insert(CommandKind::PlayerLeft, CommandConfiguration::EXECUTE_ON_SERVER);
        configurations.insert(CommandKind::RequestWorldSnapshot, CommandConfiguration::EXECUTE_ON_SERVER);
        configurations.insert(CommandKind::ChatMessage, CommandConfiguration::RELAY);
        configurations.insert(CommandKind::SetSimulationSpeed, CommandConfiguration::RELAY);
        configurations.insert(CommandKind::PauseSimulation, CommandConfiguration::RELAY);
        configurations.insert(CommandKind::MoveCursor, CommandConfiguration::RELAY);
        configurations.insert(CommandKind::WorldSnapshot, CommandConfiguration::RELAY);
        Self { configurations }
    }

    /// Overrides the routing for one command kind.
    pub fn configure(&mut self, kind: CommandKind, configuration: CommandConfiguration) {
        self.configurations.insert(kind, configuration);
    }
}

impl Default for DefaultCommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry for DefaultCommandRegistry {
    fn configuration(&self, kind: CommandKind) -> CommandConfiguration {
        self.configurations
            .get(&kind)
            .copied()
            .unwrap_or(CommandConfiguration::EXECUTE_ON_SERVER)
    }
}
