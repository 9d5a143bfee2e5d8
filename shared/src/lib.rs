//! Types and wire contracts shared between the LAN session client and server.
//!
//! Everything that crosses a socket lives here: participant identities,
//! the command vocabulary and its routing registry, the command envelope
//! codec, and the framed session transport helpers. The `client`,
//! `server` and `discovery` crates build on these without defining any
//! wire format of their own.

pub mod command;
pub mod envelope;
pub mod identity;
pub mod wire;

pub use command::{
    Command, CommandConfiguration, CommandKind, CommandRegistry, DefaultCommandRegistry,
};
pub use envelope::{CodecError, CommandEnvelope, CommandOptions, MessageCodec};
pub use identity::{ClientId, ServerInfo};

/// Default UDP port for LAN server discovery.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9050;

/// Default TCP port for the multiplayer session itself.
pub const DEFAULT_SESSION_PORT: u16 = 9051;
