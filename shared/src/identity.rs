//! Identities of session participants and advertised servers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identity of a session participant.
///
/// Equality is value-based: two `ClientId`s compare equal when their
/// underlying 128-bit identifiers match, never by transport connection.
/// A client generates its id once per process and re-presents it in the
/// connection handshake, so a reconnecting player keeps the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generates a fresh, globally unique identifier.
    pub fn new() -> Self {
        ClientId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ClientId(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        ClientId(id)
    }
}

/// Advertisable identity of a hosted session.
///
/// The `server_id` is generated when hosting starts and stays stable for
/// the lifetime of that hosting session; discovery uses it to de-duplicate
/// repeated announcements of the same server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Display name shown in the server list, typically the host player's name.
    pub name: String,
    /// Address clients connect to for the session itself.
    pub endpoint: SocketAddr,
    /// Stable identifier of this hosting session.
    pub server_id: Uuid,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, endpoint: SocketAddr, server_id: Uuid) -> Self {
        Self {
            name: name.into(),
            endpoint,
            server_id,
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.name, self.endpoint)
    }
}
