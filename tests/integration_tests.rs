//! Integration tests for the LAN session components
//!
//! These tests exercise discovery, connection lifecycle and command
//! relay over real loopback sockets. Every test uses its own port pair
//! so they can run in parallel.

use client::{ClientEvent, ConnectionState, LanClient};
use discovery::{DiscoveryConfig, LanDiscovery};
use server::{LanPlayerProfileProvider, LanServer, ServerConfig, ServerEvent, ServerState};
use shared::{ClientId, Command, CommandOptions, DefaultCommandRegistry};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn start_server(port: u16, discovery_port: u16) -> LanServer {
    let mut server = LanServer::new(
        Arc::new(DefaultCommandRegistry::new()),
        Arc::new(LanPlayerProfileProvider::with_name("integration-host")),
        ServerConfig {
            port,
            discovery: DiscoveryConfig {
                port: discovery_port,
                broadcast_addr: Ipv4Addr::LOCALHOST,
                ..DiscoveryConfig::default()
            },
        },
    );
    server.start().expect("server failed to start");
    server
}

fn session_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Ticks the server and every client until the condition holds or the
/// deadline passes.
fn pump_until(
    server: &mut LanServer,
    clients: &mut [&mut LanClient],
    mut condition: impl FnMut(&mut LanServer, &mut [&mut LanClient]) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        server.tick();
        for client in clients.iter_mut() {
            client.tick();
        }
        if condition(server, clients) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Connects a fresh client and waits for both sides to observe it.
fn join(server: &mut LanServer, port: u16) -> LanClient {
    let mut client = LanClient::new();
    client.connect(session_addr(port)).expect("connect failed");
    let id = client.id();

    let joined = pump_until(server, &mut [&mut client], |server, clients| {
        clients[0].state() == ConnectionState::Connected && server.clients().contains(&id)
    });
    assert!(joined, "client {id} never joined");
    client
}

fn drain_server_events(server: &mut LanServer) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Some(event) = server.poll_event() {
        events.push(event);
    }
    events
}

fn drain_commands(client: &mut LanClient) -> Vec<Command> {
    let mut commands = Vec::new();
    while let Some(event) = client.poll_event() {
        if let ClientEvent::CommandReceived(command) = event {
            commands.push(command);
        }
    }
    commands
}

/// SERVER DISCOVERY TESTS
mod discovery_tests {
    use super::*;

    /// A browsing client finds a started server through the UDP
    /// request/response exchange.
    #[test]
    fn server_discovered_over_loopback() {
        let mut server = start_server(42001, 42002);

        let mut browser = LanDiscovery::new(DiscoveryConfig {
            port: 42002,
            broadcast_addr: Ipv4Addr::LOCALHOST,
            ..DiscoveryConfig::default()
        });
        browser.start_as_client().expect("browser failed to start");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut found = None;
        while Instant::now() < deadline && found.is_none() {
            server.tick();
            browser.tick();
            found = browser.poll_discovered();
            std::thread::sleep(Duration::from_millis(10));
        }

        let info = found.expect("no server discovered");
        assert_eq!(info.name, "integration-host");
        assert_eq!(info.endpoint.port(), 42001);
        assert_eq!(Some(info.server_id), server.session_id());

        browser.stop();
        server.stop();
    }

    /// Repeated announcements from the same server do not produce
    /// duplicate discovery events.
    #[test]
    fn rediscovery_is_deduplicated() {
        let mut server = start_server(42011, 42012);

        let mut browser = LanDiscovery::new(DiscoveryConfig {
            port: 42012,
            broadcast_addr: Ipv4Addr::LOCALHOST,
            interval: Duration::from_millis(100),
        });
        browser.start_as_client().expect("browser failed to start");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = 0;
        let mut first_seen: Option<Instant> = None;
        while Instant::now() < deadline {
            server.tick();
            browser.tick();
            while browser.poll_discovered().is_some() {
                events += 1;
                first_seen.get_or_insert_with(Instant::now);
            }
            // Once found, keep pumping long enough for several more
            // announcement rounds before asserting.
            if first_seen.is_some_and(|at| at.elapsed() > Duration::from_millis(500)) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(events, 1);
        assert_eq!(browser.discovered_servers().len(), 1);

        browser.stop();
        server.stop();
    }
}

/// CONNECTION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    /// Full join/leave cycle observed from both ends.
    #[test]
    fn connect_and_disconnect_lifecycle() {
        let mut server = start_server(42021, 42022);
        drain_server_events(&mut server);

        let mut client = join(&mut server, 42021);
        let id = client.id();

        let events = drain_server_events(&mut server);
        assert!(events.contains(&ServerEvent::ClientConnected(id)));

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let left = pump_until(&mut server, &mut [], |server, _| {
            !server.clients().contains(&id)
        });
        assert!(left, "server never noticed the disconnect");
        let events = drain_server_events(&mut server);
        assert!(events.contains(&ServerEvent::ClientDisconnected(id)));

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    /// The first peer to register becomes the session host; the
    /// designation clears when that peer leaves.
    #[test]
    fn first_client_becomes_host() {
        let mut server = start_server(42031, 42032);

        let mut first = join(&mut server, 42031);
        let mut second = join(&mut server, 42031);
        assert_eq!(server.host(), Some(first.id()));

        first.disconnect();
        let cleared = pump_until(&mut server, &mut [&mut second], |server, _| {
            server.host().is_none()
        });
        assert!(cleared, "host designation never cleared");

        // A later arrival does not inherit the role implicitly.
        let mut third = join(&mut server, 42031);
        assert_eq!(server.host(), None);

        server
            .assign_host(third.id())
            .expect("assign_host should accept a connected client");
        assert_eq!(server.host(), Some(third.id()));

        second.disconnect();
        third.disconnect();
        server.stop();
    }
}

/// COMMAND RELAY TESTS
mod relay_tests {
    use super::*;

    /// Execute-on-server commands surface as server events and are not
    /// echoed to other clients.
    #[test]
    fn execute_on_server_command_is_not_relayed() {
        let mut server = start_server(42041, 42042);
        let mut sender = join(&mut server, 42041);
        let mut observer = join(&mut server, 42041);
        drain_server_events(&mut server);

        sender
            .send(&Command::RequestWorldSnapshot, CommandOptions::NONE)
            .expect("send failed");

        let sender_id = sender.id();
        let received = pump_until(
            &mut server,
            &mut [&mut sender, &mut observer],
            |server, _| {
                server.poll_event()
                    == Some(ServerEvent::CommandReceived {
                        client: sender_id,
                        command: Command::RequestWorldSnapshot,
                    })
            },
        );
        assert!(received, "server never executed the command");

        // Give any stray relay time to arrive before asserting silence.
        std::thread::sleep(Duration::from_millis(200));
        server.tick();
        observer.tick();
        assert!(drain_commands(&mut observer).is_empty());

        server.stop();
    }

    /// Relayed commands reach every other client but never echo back to
    /// the sender.
    #[test]
    fn relayed_command_skips_the_sender() {
        let mut server = start_server(42051, 42052);
        let mut alice = join(&mut server, 42051);
        let mut bob = join(&mut server, 42051);

        let chat = Command::ChatMessage {
            player: "alice".to_string(),
            text: "hello".to_string(),
        };
        alice.send(&chat, CommandOptions::NONE).expect("send failed");

        let delivered = pump_until(&mut server, &mut [&mut alice, &mut bob], |_, clients| {
            drain_commands(&mut *clients[1]).contains(&chat)
        });
        assert!(delivered, "relay never reached the other client");

        std::thread::sleep(Duration::from_millis(200));
        server.tick();
        alice.tick();
        assert!(drain_commands(&mut alice).is_empty(), "command echoed to sender");

        server.stop();
    }

    /// The skip-host option additionally excludes the session host from
    /// the relay targets.
    #[test]
    fn skip_host_option_excludes_host() {
        let mut server = start_server(42061, 42062);
        let mut host = join(&mut server, 42061);
        let mut sender = join(&mut server, 42061);
        let mut other = join(&mut server, 42061);
        assert_eq!(server.host(), Some(host.id()));

        let command = Command::SetSimulationSpeed { speed: 3 };
        sender
            .send(&command, CommandOptions::SKIP_HOST)
            .expect("send failed");

        let delivered = pump_until(
            &mut server,
            &mut [&mut host, &mut sender, &mut other],
            |_, clients| drain_commands(&mut *clients[2]).contains(&command),
        );
        assert!(delivered, "relay never reached the non-host client");

        std::thread::sleep(Duration::from_millis(200));
        server.tick();
        host.tick();
        sender.tick();
        assert!(drain_commands(&mut host).is_empty(), "command reached the host");
        assert!(drain_commands(&mut sender).is_empty(), "command echoed to sender");

        server.stop();
    }

    /// Server-originated sends reach exactly the addressed client.
    #[test]
    fn server_send_to_targets_one_client() {
        let mut server = start_server(42071, 42072);
        let mut target = join(&mut server, 42071);
        let mut bystander = join(&mut server, 42071);

        let snapshot = Command::WorldSnapshot {
            tick: 7,
            data: vec![1, 2, 3],
        };
        server.send_to(target.id(), &snapshot).expect("send_to failed");

        let delivered = pump_until(
            &mut server,
            &mut [&mut target, &mut bystander],
            |_, clients| drain_commands(&mut *clients[0]).contains(&snapshot),
        );
        assert!(delivered, "addressed client never received the command");

        std::thread::sleep(Duration::from_millis(200));
        server.tick();
        bystander.tick();
        assert!(drain_commands(&mut bystander).is_empty());

        let stranger = ClientId::new();
        assert!(server.send_to(stranger, &snapshot).is_err());

        server.stop();
    }
}

/// IDENTITY HANDSHAKE TESTS
mod identity_tests {
    use super::*;
    use shared::wire::Frame;
    use std::io::Write;
    use std::net::TcpStream;

    fn write_raw_frame(stream: &mut TcpStream, frame: &Frame) {
        let body = bincode::serialize(frame).expect("frame serialization failed");
        let len = (body.len() as u32).to_le_bytes();
        stream.write_all(&len).expect("write failed");
        stream.write_all(&body).expect("write failed");
        stream.flush().expect("flush failed");
    }

    /// A handshake that claims a malformed identity is still admitted,
    /// under a server-generated one.
    #[test]
    fn malformed_identity_gets_generated_fallback() {
        let mut server = start_server(42081, 42082);
        drain_server_events(&mut server);

        let mut raw = TcpStream::connect(session_addr(42081)).expect("connect failed");
        write_raw_frame(
            &mut raw,
            &Frame::Hello {
                client_id: Some("not-a-guid".to_string()),
            },
        );

        let admitted = pump_until(&mut server, &mut [], |server, _| {
            server.clients().len() == 1
        });
        assert!(admitted, "malformed handshake was rejected");

        // The synthesized identity is a real one, not the raw string.
        let id = server.clients()[0];
        assert!("not-a-guid".parse::<ClientId>().is_err());
        assert!(id.to_string().parse::<ClientId>().is_ok());

        drop(raw);
        server.stop();
    }

    /// A reconnect under an already-registered identity replaces the
    /// connection and keeps connect/disconnect events paired.
    #[test]
    fn reconnect_same_identity_pairs_events() {
        let mut server = start_server(42091, 42092);
        let id = ClientId::new();
        let hello = Frame::Hello {
            client_id: Some(id.to_string()),
        };

        let mut first = TcpStream::connect(session_addr(42091)).expect("connect failed");
        write_raw_frame(&mut first, &hello);
        let joined = pump_until(&mut server, &mut [], |server, _| {
            server.clients() == vec![id]
        });
        assert!(joined, "first connection never registered");
        drain_server_events(&mut server);

        let mut second = TcpStream::connect(session_addr(42091)).expect("connect failed");
        write_raw_frame(&mut second, &hello);

        let mut seen = Vec::new();
        let replaced = pump_until(&mut server, &mut [], |server, _| {
            seen.extend(drain_server_events(server));
            seen.contains(&ServerEvent::ClientConnected(id))
        });
        assert!(replaced, "reconnect never registered");
        assert_eq!(
            seen,
            vec![
                ServerEvent::ClientDisconnected(id),
                ServerEvent::ClientConnected(id),
            ]
        );
        assert_eq!(server.clients(), vec![id]);

        drop(first);
        drop(second);
        server.stop();
    }
}
