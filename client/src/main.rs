use clap::Parser;
use client::{ClientEvent, ConnectionState, LanClient};
use discovery::{DiscoveryConfig, LanDiscovery};
use log::{info, warn};
use shared::{Command, CommandOptions, DEFAULT_DISCOVERY_PORT};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Browses the LAN for a server (or takes an explicit address), joins it
/// and logs the command stream.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server session address; when omitted, the first discovered
        /// server is joined
        #[clap(short, long)]
        server: Option<SocketAddr>,
        /// UDP port discovery requests are broadcast to
        #[clap(short, long, default_value_t = DEFAULT_DISCOVERY_PORT)]
        discovery_port: u16,
        /// Chat line announced after joining
        #[clap(short, long)]
        message: Option<String>,
    }

    env_logger::init();
    let args = Args::parse();

    let server = match args.server {
        Some(addr) => addr,
        None => browse(args.discovery_port)?,
    };

    let mut lan_client = LanClient::new();
    lan_client.connect(server)?;

    loop {
        lan_client.tick();
        while let Some(event) = lan_client.poll_event() {
            match event {
                ClientEvent::StateChanged(ConnectionState::Connected) => {
                    info!("Joined {server} as {}", lan_client.id());
                    if let Some(text) = args.message.clone() {
                        lan_client.send(
                            &Command::ChatMessage {
                                player: lan_client.id().to_string(),
                                text,
                            },
                            CommandOptions::NONE,
                        )?;
                    }
                }
                ClientEvent::StateChanged(state) => {
                    info!("Connection state: {state:?}");
                    if state == ConnectionState::Disconnected
                        || state == ConnectionState::Error
                    {
                        return Ok(());
                    }
                }
                ClientEvent::CommandReceived(command) => {
                    info!("Received {:?}", command.kind());
                    if let Command::ChatMessage { player, text } = command {
                        println!("<{player}> {text}");
                    }
                }
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Broadcasts discovery requests and returns the first server found.
fn browse(discovery_port: u16) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let mut discovery = LanDiscovery::new(DiscoveryConfig {
        port: discovery_port,
        ..DiscoveryConfig::default()
    });
    discovery.start_as_client()?;
    info!("Browsing for LAN servers on port {discovery_port}");

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        discovery.tick();
        if let Some(info) = discovery.poll_discovered() {
            info!("Found {info}");
            discovery.stop();
            return Ok(info.endpoint);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    discovery.stop();
    warn!("No servers found within 10s");
    Err("no LAN servers found".into())
}
