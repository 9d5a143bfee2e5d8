//! Joining side of a LAN multiplayer session.
//!
//! [`network::LanClient`] holds one reliable connection to a server and
//! a stable client identity; server browsing itself is provided by the
//! `discovery` crate.

pub mod network;

pub use network::{ClientError, ClientEvent, ConnectionState, LanClient};
