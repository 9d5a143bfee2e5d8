//! Active-peer bookkeeping for the session server
//!
//! This module owns the server-side mapping between participant
//! identities and their transport connections, including:
//! - Registration and removal over the connection lifecycle
//! - Reverse lookup from a transport token to the peer's `ClientId`
//! - Explicit host tracking for the "skip host" delivery exemption
//! - Snapshot accessors for external readers
//!
//! The set is mutated only on the server's tick; everything handed out
//! to other code is a copy, never a live view of the map.

use log::{info, warn};
use shared::wire::PayloadSender;
use shared::ClientId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// One accepted inbound connection and the handle for sending to it.
///
/// The `token` is assigned by the transport when the connection is
/// accepted and is the key transport notifications arrive under; the
/// `ClientId` is the session-level identity resolved from the handshake.
#[derive(Debug)]
pub struct Peer {
    /// Session identity of this participant.
    pub id: ClientId,
    /// Remote address the connection came from.
    pub addr: SocketAddr,
    /// Transport-assigned connection token, unique per accepted stream.
    pub token: u64,
    /// Time the peer was registered.
    pub connected_at: Instant,
    sender: PayloadSender,
}

impl Peer {
    pub fn new(id: ClientId, addr: SocketAddr, token: u64, sender: PayloadSender) -> Self {
        Self {
            id,
            addr,
            token,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// Queues an already-encoded payload for delivery to this peer.
    ///
    /// Returns false when the connection's writer has already shut down;
    /// the matching disconnect notification is on its way in that case.
    pub fn send(&self, payload: Vec<u8>) -> bool {
        self.sender.send(payload).is_ok()
    }
}

/// The set of currently connected peers, keyed by session identity.
///
/// Host identity is tracked as an explicit value rather than inferred
/// from map order: the first registered peer becomes the host while no
/// host is assigned, `assign_host` can move it deliberately, and a
/// disconnecting host leaves the slot empty until it is reassigned.
pub struct PeerSet {
    peers: HashMap<ClientId, Peer>,
    host: Option<ClientId>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            host: None,
        }
    }

    /// Registers an accepted peer under its resolved identity.
    ///
    /// A reconnect under the same identity replaces the previous entry;
    /// the replaced peer is returned so the caller can log it. The first
    /// peer registered while no host is assigned becomes the host.
    pub fn register(&mut self, peer: Peer) -> Option<Peer> {
        let id = peer.id;
        info!("Peer {} registered from {}", id, peer.addr);
        let replaced = self.peers.insert(id, peer);

        if self.host.is_none() {
            info!("Peer {id} designated as session host");
            self.host = Some(id);
        }
        replaced
    }

    /// Removes a peer by identity. Clears the host slot if the host left.
    pub fn remove(&mut self, id: &ClientId) -> Option<Peer> {
        let removed = self.peers.remove(id);
        if removed.is_some() {
            info!("Peer {id} removed");
            if self.host == Some(*id) {
                warn!("Session host {id} disconnected; no host is assigned until reassignment");
                self.host = None;
            }
        }
        removed
    }

    /// Removes the peer owning a transport token, returning its identity.
    ///
    /// Transport-level notifications (remote disconnect, stream errors)
    /// carry only the token, so removal resolves the identity by reverse
    /// lookup. Returns `None` when the token is unknown, which makes a
    /// duplicate disconnect notification a no-op.
    pub fn remove_by_token(&mut self, token: u64) -> Option<ClientId> {
        let id = self.client_id_by_token(token)?;
        self.remove(&id);
        Some(id)
    }

    /// Resolves a transport token to the identity registered for it.
    pub fn client_id_by_token(&self, token: u64) -> Option<ClientId> {
        self.peers
            .iter()
            .find(|(_, peer)| peer.token == token)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, id: &ClientId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &Peer)> {
        self.peers.iter()
    }

    /// Snapshot of the connected identities, safe to hand to external
    /// readers while the set keeps changing underneath.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.peers.keys().copied().collect()
    }

    /// The peer currently designated as session host, if any.
    pub fn host(&self) -> Option<ClientId> {
        self.host
    }

    /// Deliberately moves the host designation to a connected peer.
    pub fn assign_host(&mut self, id: ClientId) -> Result<(), ClientId> {
        if !self.peers.contains_key(&id) {
            return Err(id);
        }
        info!("Peer {id} assigned as session host");
        self.host = Some(id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drops every peer and the host designation. Dropping the senders
    /// shuts down the per-peer writer tasks.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.host = None;
    }
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::new()
    }
}
