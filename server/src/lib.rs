//! Hosting side of a LAN multiplayer session.
//!
//! [`network::LanServer`] owns the listening transport, the connected
//! peer roster and the discovery announcer; [`relay::RelayPolicy`]
//! decides per command kind whether the server consumes a command or
//! forwards it to the other peers.

pub mod network;
pub mod peer_set;
pub mod profile;
pub mod relay;

pub use network::{LanServer, ServerConfig, ServerError, ServerEvent, ServerState};
pub use peer_set::{Peer, PeerSet};
pub use profile::{LanPlayerProfileProvider, PlayerProfileProvider};
pub use relay::{RelayDecision, RelayPolicy};
