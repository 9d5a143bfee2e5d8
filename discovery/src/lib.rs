//! Best-effort LAN server discovery over UDP broadcast.
//!
//! A joining client broadcasts a request datagram on the well-known
//! discovery port once a second; a hosting server answers each request
//! with a unicast datagram carrying its advertised [`ServerInfo`]. The
//! exchange is unauthenticated and lossy by design: there is no
//! acknowledgment and no retry beyond the periodic broadcast.
//!
//! The service is driven entirely by an external `tick()` call. It keeps
//! a table of servers seen so far and surfaces a discovered-server event
//! only on first sight of a server id or when its advertised name
//! changes, so periodic re-announcements do not cause event storms.

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use shared::{ServerInfo, DEFAULT_DISCOVERY_PORT};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Tag bytes of a discovery request datagram. The request has no payload.
pub const DISCOVERY_REQUEST_TAG: &[u8] = b"LANDISC";

/// Tag bytes prefixing a discovery response datagram.
pub const DISCOVERY_RESPONSE_TAG: &[u8] = b"LANINFO";

/// Tuning of the discovery exchange.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port servers listen for requests on.
    pub port: u16,
    /// Address requests are broadcast to. The default reaches the whole
    /// local segment; tests point it at loopback.
    pub broadcast_addr: Ipv4Addr,
    /// Time between request broadcasts in client mode.
    pub interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
            interval: Duration::from_millis(1000),
        }
    }
}

/// Wire body of a discovery response: the tag bytes are followed by this
/// structure, bincode-encoded. The id travels as 16 raw bytes.
#[derive(Debug, Serialize, Deserialize)]
struct ServerAnnouncement {
    name: String,
    address: String,
    port: u16,
    server_id: [u8; 16],
}

fn encode_response(info: &ServerInfo) -> Option<Vec<u8>> {
    let announcement = ServerAnnouncement {
        name: info.name.clone(),
        address: info.endpoint.ip().to_string(),
        port: info.endpoint.port(),
        server_id: *info.server_id.as_bytes(),
    };
    match bincode::serialize(&announcement) {
        Ok(body) => {
            let mut datagram = DISCOVERY_RESPONSE_TAG.to_vec();
            datagram.extend(body);
            Some(datagram)
        }
        Err(e) => {
            warn!("Failed to encode discovery response: {e}");
            None
        }
    }
}

fn parse_response(body: &[u8]) -> Result<ServerInfo, bincode::Error> {
    let announcement: ServerAnnouncement = bincode::deserialize(body)?;
    let ip = announcement
        .address
        .parse()
        .map_err(|e| bincode::ErrorKind::Custom(format!("bad address: {e}")))?;
    Ok(ServerInfo::new(
        announcement.name,
        SocketAddr::new(ip, announcement.port),
        Uuid::from_bytes(announcement.server_id),
    ))
}

/// LAN discovery endpoint, acting either as a searching client or as an
/// announce-responder for a hosted server.
///
/// All socket work happens inside [`LanDiscovery::tick`], driven by the
/// host game's frame loop; nothing here blocks or runs on its own thread.
pub struct LanDiscovery {
    config: DiscoveryConfig,
    socket: Option<UdpSocket>,
    /// Present iff running in server (announce-responder) mode.
    server_info: Option<ServerInfo>,
    discovered: HashMap<Uuid, ServerInfo>,
    events: VecDeque<ServerInfo>,
    last_broadcast: Option<Instant>,
}

impl LanDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            socket: None,
            server_info: None,
            discovered: HashMap::new(),
            events: VecDeque::new(),
            last_broadcast: None,
        }
    }

    /// Starts searching for servers. Any prior discovery session is
    /// stopped first, so repeated calls are safe.
    pub fn start_as_client(&mut self) -> io::Result<()> {
        self.stop();
        info!("Starting LAN discovery client");

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Starts answering discovery requests with `info`. Any prior
    /// discovery session is stopped first.
    pub fn start_as_server(&mut self, info: ServerInfo) -> io::Result<()> {
        self.stop();
        info!(
            "Starting LAN discovery server for '{}' on port {}",
            info.name, self.config.port
        );

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.port))?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        self.socket = Some(socket);
        self.server_info = Some(info);
        Ok(())
    }

    /// Closes the endpoint and clears the discovered-server table. Safe
    /// to call at any time, including when already stopped.
    pub fn stop(&mut self) {
        if self.socket.is_some() {
            info!("Stopping LAN discovery");
        }
        self.socket = None;
        self.server_info = None;
        self.discovered.clear();
        self.last_broadcast = None;
    }

    pub fn is_running(&self) -> bool {
        self.socket.is_some()
    }

    /// Drains pending datagrams and, in client mode, broadcasts a request
    /// once per interval. A no-op when the endpoint is not running.
    pub fn tick(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };

        let mut incoming = Vec::new();
        let mut buf = [0u8; 1500];
        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => incoming.push((buf[..len].to_vec(), from)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("Error receiving discovery datagram: {e}");
                    break;
                }
            }
        }

        for (data, from) in incoming {
            self.handle_datagram(&data, from);
        }

        // Server mode only responds; the periodic broadcast is client-side.
        if self.server_info.is_some() {
            return;
        }

        let due = self
            .last_broadcast
            .map_or(true, |at| at.elapsed() >= self.config.interval);
        if due {
            self.send_request();
            self.last_broadcast = Some(Instant::now());
        }
    }

    /// Next discovered-server event, if any. Events are queued during
    /// `tick()` in arrival order.
    pub fn poll_discovered(&mut self) -> Option<ServerInfo> {
        self.events.pop_front()
    }

    /// Snapshot of every server seen in this discovery session.
    pub fn discovered_servers(&self) -> Vec<ServerInfo> {
        self.discovered.values().cloned().collect()
    }

    fn send_request(&self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let target = SocketAddr::from((self.config.broadcast_addr, self.config.port));
        trace!("Broadcasting LAN discovery request to {target}");
        if let Err(e) = socket.send_to(DISCOVERY_REQUEST_TAG, target) {
            warn!("Failed to broadcast discovery request: {e}");
        }
    }

    fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) {
        // Server mode: answer requests, ignore everything else.
        if let Some(info) = &self.server_info {
            if data == DISCOVERY_REQUEST_TAG {
                trace!("Discovery request from {from}, sending server info");
                if let (Some(response), Some(socket)) =
                    (encode_response(info), self.socket.as_ref())
                {
                    if let Err(e) = socket.send_to(&response, from) {
                        warn!("Failed to answer discovery request from {from}: {e}");
                    }
                }
            } else {
                debug!("Ignoring unexpected discovery datagram from {from}");
            }
            return;
        }

        // Client mode: accept responses only.
        let Some(body) = data.strip_prefix(DISCOVERY_RESPONSE_TAG) else {
            debug!("Ignoring unexpected discovery datagram from {from}");
            return;
        };

        match parse_response(body) {
            Ok(info) => self.record_server(info),
            Err(e) => warn!("Malformed discovery response from {from}: {e}"),
        }
    }

    /// Updates the table and queues an event, but only for servers not
    /// seen before or whose advertised name changed.
    fn record_server(&mut self, info: ServerInfo) {
        let known = self.discovered.get(&info.server_id);
        if known.map_or(false, |existing| existing.name == info.name) {
            return;
        }

        info!("Discovered LAN server: {info}");
        self.discovered.insert(info.server_id, info.clone());
        self.events.push_back(info);
    }
}
