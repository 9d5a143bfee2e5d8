//! Client side of the LAN session: a single reliable connection to one
//! server, driven by a poll loop.
//!
//! The transport lives on a client-owned tokio runtime. A connection
//! task dials the server, performs the identity handshake and then pumps
//! frames; everything the caller observes (state transitions, received
//! commands) is applied when [`LanClient::tick`] drains the task's
//! notifications on the calling thread.

use log::{debug, error, info, warn};
use shared::wire::{self, Frame, PayloadSender, DISCONNECT_TIMEOUT};
use shared::{ClientId, Command, CommandOptions, MessageCodec};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// Connection lifecycle of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events surfaced to the session layer, drained via [`LanClient::poll_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    CommandReceived(Command),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is already connected or connecting")]
    AlreadyConnected,
    #[error("client is not connected")]
    NotConnected,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] shared::CodecError),
}

/// Notifications sent from the connection task to the tick loop.
#[derive(Debug)]
enum TransportEvent {
    Connected { sender: PayloadSender },
    ConnectFailed { error: io::Error },
    Data { payload: Vec<u8> },
    Closed,
    IoError { error: io::Error },
}

/// Transport resources of one connection attempt or live connection.
struct ClientIo {
    runtime: Runtime,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    sender: Option<PayloadSender>,
}

/// Connects to one discovered server and exchanges commands with it.
///
/// The client identity is generated once per `LanClient` and presented
/// on every connection, so a reconnect resumes the same player slot.
pub struct LanClient {
    id: ClientId,
    state: ConnectionState,
    codec: MessageCodec,
    events: VecDeque<ClientEvent>,
    io: Option<ClientIo>,
}

impl LanClient {
    pub fn new() -> Self {
        Self {
            id: ClientId::new(),
            state: ConnectionState::Disconnected,
            codec: MessageCodec::new(),
            events: VecDeque::new(),
            io: None,
        }
    }

    /// Identity presented to servers during the handshake.
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Begins connecting to a server's session endpoint. The outcome
    /// arrives through `tick()`: `Connected` on success, back to
    /// `Disconnected` when the server cannot be reached.
    pub fn connect(&mut self, server: SocketAddr) -> Result<(), ClientError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }

        info!("Connecting to {server} as {}", self.id);
        let runtime = Runtime::new()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        runtime.spawn(connection_task(server, self.id, event_tx));
        self.io = Some(ClientIo {
            runtime,
            events: event_rx,
            sender: None,
        });
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Drops the connection, if any. Idempotent; the state change fires
    /// synchronously inside this call.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        info!("Disconnecting from server");
        self.reset();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drains pending transport notifications. Must be invoked
    /// periodically; all events fire synchronously inside this call.
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
    }

    /// Next pending event, in arrival order.
    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    /// Sends a command to the server, reliably and in order.
    ///
    /// A failure to encode or to queue the payload poisons the
    /// connection: the client moves to the `Error` state, since the
    /// server would otherwise see a gap in the command stream.
    pub fn send(&mut self, command: &Command, options: CommandOptions) -> Result<(), ClientError> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }

        let data = match self.codec.encode(command, options) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode {:?}: {e}", command.kind());
                self.reset();
                self.set_state(ConnectionState::Error);
                return Err(e.into());
            }
        };

        let queued = self
            .io
            .as_ref()
            .and_then(|io| io.sender.as_ref())
            .is_some_and(|sender| sender.send(data).is_ok());
        if !queued {
            error!("Transport closed while sending {:?}", command.kind());
            self.reset();
            self.set_state(ConnectionState::Error);
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "session transport closed",
            )));
        }
        Ok(())
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { sender } => {
                if let Some(io) = self.io.as_mut() {
                    io.sender = Some(sender);
                }
                info!("Connected to server");
                self.set_state(ConnectionState::Connected);
            }
            TransportEvent::ConnectFailed { error } => {
                warn!("Connection attempt failed: {error}");
                self.reset();
                self.set_state(ConnectionState::Disconnected);
            }
            TransportEvent::Data { payload } => match self.codec.decode(&payload) {
                Ok(command) => {
                    debug!("Received {:?}", command.kind());
                    self.events.push_back(ClientEvent::CommandReceived(command));
                }
                Err(e) => warn!("Dropping undecodable command from server: {e}"),
            },
            TransportEvent::Closed => {
                info!("Server closed the connection");
                self.reset();
                self.set_state(ConnectionState::Disconnected);
            }
            TransportEvent::IoError { error } => {
                error!("Connection error: {error}");
                self.reset();
                self.set_state(ConnectionState::Error);
            }
        }
    }

    fn reset(&mut self) {
        if let Some(io) = self.io.take() {
            io.runtime.shutdown_background();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.events.push_back(ClientEvent::StateChanged(state));
    }
}

impl Default for LanClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LanClient {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Dials the server, presents the client identity and pumps frames until
/// the connection dies.
async fn connection_task(
    server: SocketAddr,
    id: ClientId,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let stream = match tokio::time::timeout(DISCONNECT_TIMEOUT, TcpStream::connect(server)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(error)) => {
            let _ = events.send(TransportEvent::ConnectFailed { error });
            return;
        }
        Err(_) => {
            let error = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
            let _ = events.send(TransportEvent::ConnectFailed { error });
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {e}");
    }
    let (mut reader, mut writer) = stream.into_split();

    let hello = Frame::Hello {
        client_id: Some(id.to_string()),
    };
    if let Err(error) = wire::write_frame(&mut writer, &hello).await {
        let _ = events.send(TransportEvent::ConnectFailed { error });
        return;
    }

    let (payload_tx, payload_rx) = mpsc::unbounded_channel();
    if events
        .send(TransportEvent::Connected { sender: payload_tx })
        .is_err()
    {
        return;
    }
    let writer_task = tokio::spawn(wire::write_session(writer, payload_rx));

    loop {
        match tokio::time::timeout(DISCONNECT_TIMEOUT, wire::read_frame(&mut reader)).await {
            Ok(Ok(Frame::Command(payload))) => {
                if events.send(TransportEvent::Data { payload }).is_err() {
                    break;
                }
            }
            Ok(Ok(Frame::Ping)) => {}
            Ok(Ok(Frame::Hello { .. })) => debug!("Ignoring handshake frame from server"),
            Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                let _ = events.send(TransportEvent::Closed);
                break;
            }
            Ok(Err(error)) => {
                let _ = events.send(TransportEvent::IoError { error });
                break;
            }
            Err(_) => {
                info!("Server idle past the disconnect threshold");
                let _ = events.send(TransportEvent::Closed);
                break;
            }
        }
    }

    writer_task.abort();
}
