//! Server network layer handling peer admission, command relay and the
//! session lifecycle.
//!
//! The transport runs on a server-owned tokio runtime: an accept loop
//! plus one reader and one writer task per peer, all forwarding their
//! notifications into an unbounded channel. Every observable state
//! change (peer registration, relay, event emission) happens when
//! [`LanServer::tick`] drains that channel on the caller's thread.

use crate::peer_set::{Peer, PeerSet};
use crate::profile::PlayerProfileProvider;
use crate::relay::{RelayDecision, RelayPolicy};
use discovery::{DiscoveryConfig, LanDiscovery};
use log::{debug, error, info, warn};
use shared::wire::{self, Frame, PayloadSender, DISCONNECT_TIMEOUT};
use shared::{
    ClientId, Command, CommandOptions, CommandRegistry, MessageCodec, ServerInfo,
    DEFAULT_SESSION_PORT,
};
use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Lifecycle stage of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Preparing,
    Started,
    Error,
}

/// Events surfaced to the session layer, drained via [`LanServer::poll_event`].
///
/// Connect and disconnect events come in pairs per connection: a
/// reconnect under an already-registered identity emits
/// `ClientDisconnected` for the replaced connection before the new
/// `ClientConnected`.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    StateChanged(ServerState),
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    CommandReceived { client: ClientId, command: Command },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already started")]
    AlreadyStarted,
    #[error("client {0} is not connected")]
    UnknownClient(ClientId),
    #[error("failed to bind session port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] shared::CodecError),
}

/// Notifications sent from transport tasks to the tick loop.
#[derive(Debug)]
enum TransportEvent {
    PeerAccepted {
        token: u64,
        client_id: ClientId,
        addr: SocketAddr,
        sender: PayloadSender,
    },
    PeerDisconnected {
        token: u64,
    },
    Data {
        token: u64,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port the session listens on.
    pub port: u16,
    pub discovery: DiscoveryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SESSION_PORT,
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Transport resources of one hosting session.
struct ServerIo {
    runtime: Runtime,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Accepts a variable number of peers, assigns stable identities, and
/// relays or executes the commands they send.
pub struct LanServer {
    state: ServerState,
    config: ServerConfig,
    codec: MessageCodec,
    relay: RelayPolicy,
    profile: Arc<dyn PlayerProfileProvider>,
    discovery: LanDiscovery,
    peers: PeerSet,
    events: VecDeque<ServerEvent>,
    io: Option<ServerIo>,
    session_id: Option<Uuid>,
}

impl LanServer {
    pub fn new(
        registry: Arc<dyn CommandRegistry>,
        profile: Arc<dyn PlayerProfileProvider>,
        config: ServerConfig,
    ) -> Self {
        let discovery = LanDiscovery::new(config.discovery.clone());
        Self {
            state: ServerState::Stopped,
            config,
            codec: MessageCodec::new(),
            relay: RelayPolicy::new(registry),
            profile,
            discovery,
            peers: PeerSet::new(),
            events: VecDeque::new(),
            io: None,
            session_id: None,
        }
    }

    /// Binds the session port, generates a fresh session id and starts
    /// announcing on the discovery port. On failure the server lands in
    /// the `Error` state; `stop()` returns it to `Stopped`.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.state != ServerState::Stopped {
            return Err(ServerError::AlreadyStarted);
        }
        self.set_state(ServerState::Preparing);

        match self.bind_and_announce() {
            Ok(()) => {
                self.set_state(ServerState::Started);
                info!("LAN server started on {}", self.endpoint());
                Ok(())
            }
            Err(e) => {
                error!("Failed to start LAN server: {e}");
                self.reset();
                self.set_state(ServerState::Error);
                Err(e)
            }
        }
    }

    /// Stops serving: tears down discovery, drops every peer and shuts
    /// the transport runtime down in the background. Idempotent.
    pub fn stop(&mut self) {
        if self.state == ServerState::Stopped {
            return;
        }
        info!("Stopping LAN server");
        self.reset();
        self.set_state(ServerState::Stopped);
    }

    /// Drains pending transport notifications and ticks the discovery
    /// announcer. Must be invoked periodically by the host loop; all
    /// events fire synchronously inside this call.
    pub fn tick(&mut self) {
        let mut batch = Vec::new();
        if let Some(io) = self.io.as_mut() {
            while let Ok(event) = io.events.try_recv() {
                batch.push(event);
            }
        }
        for event in batch {
            self.handle_transport_event(event);
        }

        self.discovery.tick();
    }

    /// Next pending event, in the order the transport delivered the
    /// underlying notifications.
    pub fn poll_event(&mut self) -> Option<ServerEvent> {
        self.events.pop_front()
    }

    /// Sends a command reliably and in order to one connected client.
    ///
    /// A logged no-op while the server is not started; an unknown target
    /// is a caller bug and fails explicitly.
    pub fn send_to(&self, client_id: ClientId, command: &Command) -> Result<(), ServerError> {
        if self.state != ServerState::Started {
            warn!("Cannot send command: server not started");
            return Ok(());
        }
        let peer = self
            .peers
            .get(&client_id)
            .ok_or(ServerError::UnknownClient(client_id))?;

        let data = self.codec.encode(command, CommandOptions::NONE)?;
        if !peer.send(data) {
            warn!("Failed to queue command for {client_id}");
        }
        Ok(())
    }

    /// Broadcasts a command to every connected peer, excluding the host
    /// when the options say so.
    pub fn broadcast(&self, command: &Command, options: CommandOptions) -> Result<(), ServerError> {
        if self.state != ServerState::Started {
            warn!("Cannot broadcast command: server not started");
            return Ok(());
        }

        let data = self.codec.encode(command, options)?;
        let host = self.peers.host();
        for (id, peer) in self.peers.iter() {
            if options.skip_host && Some(*id) == host {
                continue;
            }
            if !peer.send(data.clone()) {
                warn!("Failed to queue command for {id}");
            }
        }
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Snapshot of the currently connected client identities.
    pub fn clients(&self) -> Vec<ClientId> {
        self.peers.client_ids()
    }

    /// The peer currently designated as session host, if any.
    pub fn host(&self) -> Option<ClientId> {
        self.peers.host()
    }

    /// Moves the host designation to a connected peer.
    pub fn assign_host(&mut self, client_id: ClientId) -> Result<(), ServerError> {
        self.peers
            .assign_host(client_id)
            .map_err(ServerError::UnknownClient)
    }

    /// Address this session is advertised under.
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(local_ip(), self.config.port)
    }

    /// Identifier of the current hosting session, present while started.
    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    fn bind_and_announce(&mut self) -> Result<(), ServerError> {
        let port = self.config.port;
        info!("Starting LAN server on port {port}");

        let runtime = Runtime::new()?;
        let listener = runtime
            .block_on(TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)))
            .map_err(|source| ServerError::Bind { port, source })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        runtime.spawn(accept_loop(listener, event_tx));
        self.io = Some(ServerIo {
            runtime,
            events: event_rx,
        });

        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        let info = ServerInfo::new(
            self.profile.player_name(),
            SocketAddr::new(local_ip(), port),
            session_id,
        );
        self.discovery.start_as_server(info)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.discovery.stop();
        if let Some(io) = self.io.take() {
            io.runtime.shutdown_background();
        }
        self.peers.clear();
        self.session_id = None;
    }

    fn set_state(&mut self, state: ServerState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.events.push_back(ServerEvent::StateChanged(state));
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerAccepted {
                token,
                client_id,
                addr,
                sender,
            } => {
                let replaced = self
                    .peers
                    .register(Peer::new(client_id, addr, token, sender));
                if let Some(previous) = replaced {
                    warn!(
                        "Client {client_id} reconnected; dropping previous connection from {}",
                        previous.addr
                    );
                    // Keep connect/disconnect events paired for the
                    // session layer: the old connection is gone.
                    self.events
                        .push_back(ServerEvent::ClientDisconnected(client_id));
                }
                info!("Client connected: {client_id} from {addr}");
                self.events
                    .push_back(ServerEvent::ClientConnected(client_id));
            }
            TransportEvent::PeerDisconnected { token } => {
                if let Some(client_id) = self.peers.remove_by_token(token) {
                    info!("Client disconnected: {client_id}");
                    self.events
                        .push_back(ServerEvent::ClientDisconnected(client_id));
                }
            }
            TransportEvent::Data { token, payload } => self.handle_payload(token, &payload),
        }
    }

    fn handle_payload(&mut self, token: u64, payload: &[u8]) {
        let Some(sender_id) = self.peers.client_id_by_token(token) else {
            warn!("Received data from unidentified connection {token}");
            return;
        };

        let command = match self.codec.decode(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping undecodable command from {sender_id}: {e}");
                return;
            }
        };
        let options = self.codec.last_options();

        match self.relay.decide(&command, options, sender_id, &self.peers) {
            RelayDecision::Execute => {
                self.events.push_back(ServerEvent::CommandReceived {
                    client: sender_id,
                    command,
                });
            }
            RelayDecision::Forward { targets } => {
                if targets.is_empty() {
                    return;
                }
                let data = match self.codec.encode(&command, options) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to re-encode relayed command: {e}");
                        return;
                    }
                };
                debug!(
                    "Relaying {:?} from {sender_id} to {} peer(s)",
                    command.kind(),
                    targets.len()
                );
                for target in targets {
                    if let Some(peer) = self.peers.get(&target) {
                        if !peer.send(data.clone()) {
                            warn!("Failed to queue relayed command for {target}");
                        }
                    }
                }
            }
        }
    }
}

impl Drop for LanServer {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Accepts inbound connections and hands each off to its own peer task.
async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<TransportEvent>) {
    let mut next_token: u64 = 1;
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let token = next_token;
                next_token += 1;
                debug!("Inbound connection from {addr} (token {token})");
                tokio::spawn(serve_peer(stream, addr, token, events.clone()));
            }
            Err(e) => {
                error!("Error accepting connection: {e}");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Admits one peer and pumps its frames until the connection dies.
///
/// Admission and registration are separate steps: this task resolves the
/// identity from the handshake and posts a notification; the `PeerSet`
/// registration and the client-connected event happen on the tick thread.
async fn serve_peer(
    stream: TcpStream,
    addr: SocketAddr,
    token: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {addr}: {e}");
    }
    let (mut reader, writer) = stream.into_split();

    // The first frame carries the claimed identity. A peer that opens
    // with something else is still admitted, under a generated identity.
    let handshake = tokio::time::timeout(DISCONNECT_TIMEOUT, wire::read_frame(&mut reader)).await;
    let (client_id, early_payload) = match handshake {
        Ok(Ok(Frame::Hello { client_id })) => (resolve_client_id(client_id, addr), None),
        Ok(Ok(Frame::Command(payload))) => {
            info!("Connection from {addr} sent no handshake; generated identity");
            (ClientId::new(), Some(payload))
        }
        Ok(Ok(Frame::Ping)) => {
            info!("Connection from {addr} sent no handshake; generated identity");
            (ClientId::new(), None)
        }
        Ok(Err(e)) => {
            warn!("Handshake failed for {addr}: {e}");
            return;
        }
        Err(_) => {
            warn!("Handshake timed out for {addr}");
            return;
        }
    };

    let (payload_tx, payload_rx) = mpsc::unbounded_channel();
    let accepted = events.send(TransportEvent::PeerAccepted {
        token,
        client_id,
        addr,
        sender: payload_tx,
    });
    if accepted.is_err() {
        return;
    }
    if let Some(payload) = early_payload {
        let _ = events.send(TransportEvent::Data { token, payload });
    }

    let writer_task = tokio::spawn(wire::write_session(writer, payload_rx));

    loop {
        match tokio::time::timeout(DISCONNECT_TIMEOUT, wire::read_frame(&mut reader)).await {
            Ok(Ok(Frame::Command(payload))) => {
                if events.send(TransportEvent::Data { token, payload }).is_err() {
                    break;
                }
            }
            Ok(Ok(Frame::Ping)) => {}
            Ok(Ok(Frame::Hello { .. })) => {
                debug!("Ignoring repeated handshake from {client_id}");
            }
            Ok(Err(e)) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    warn!("Read error from {client_id}: {e}");
                }
                break;
            }
            Err(_) => {
                info!("Connection {client_id} idle past the disconnect threshold");
                break;
            }
        }
    }

    writer_task.abort();
    let _ = events.send(TransportEvent::PeerDisconnected { token });
}

/// Resolves the handshake payload into a peer identity: a valid UUID
/// string is used as-is, anything else is replaced by a fresh identity.
fn resolve_client_id(raw: Option<String>, addr: SocketAddr) -> ClientId {
    match raw {
        Some(raw) => match raw.parse() {
            Ok(id) => id,
            Err(_) => {
                let id = ClientId::new();
                warn!("Received invalid client id '{raw}' from {addr}; generated {id}");
                id
            }
        },
        None => {
            let id = ClientId::new();
            info!("No client id in connection request from {addr}; generated {id}");
            id
        }
    }
}

/// Best local guess at the address this machine is reachable under. A
/// UDP connect selects the outbound interface without sending anything;
/// loopback is the fallback when there is no route at all.
fn local_ip() -> IpAddr {
    std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
