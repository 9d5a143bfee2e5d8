use clap::Parser;
use log::info;
use server::{LanPlayerProfileProvider, LanServer, ServerConfig, ServerEvent};
use shared::{DefaultCommandRegistry, DEFAULT_DISCOVERY_PORT, DEFAULT_SESSION_PORT};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Hosts a LAN session and logs session events until interrupted.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// TCP port the session listens on
        #[clap(short, long, default_value_t = DEFAULT_SESSION_PORT)]
        port: u16,
        /// UDP port discovery requests arrive on
        #[clap(short, long, default_value_t = DEFAULT_DISCOVERY_PORT)]
        discovery_port: u16,
        /// Name announced to browsing clients (defaults to the machine name)
        #[clap(short, long)]
        name: Option<String>,
    }

    env_logger::init();
    let args = Args::parse();

    let profile = match args.name {
        Some(name) => LanPlayerProfileProvider::with_name(name),
        None => LanPlayerProfileProvider::new(),
    };

    let mut config = ServerConfig {
        port: args.port,
        ..ServerConfig::default()
    };
    config.discovery.port = args.discovery_port;

    let mut server = LanServer::new(
        Arc::new(DefaultCommandRegistry::new()),
        Arc::new(profile),
        config,
    );
    server.start()?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc_handler(move || running.store(false, Ordering::SeqCst));
    }

    // Single-threaded session loop: every event fires inside tick().
    while running.load(Ordering::SeqCst) {
        server.tick();
        while let Some(event) = server.poll_event() {
            match event {
                ServerEvent::StateChanged(state) => info!("Server state: {state:?}"),
                ServerEvent::ClientConnected(id) => {
                    info!("Client joined: {id} ({} connected)", server.clients().len());
                }
                ServerEvent::ClientDisconnected(id) => {
                    info!("Client left: {id} ({} connected)", server.clients().len());
                }
                ServerEvent::CommandReceived { client, command } => {
                    info!("Command from {client}: {:?}", command.kind());
                }
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    info!("Shutting down");
    server.stop();
    Ok(())
}

/// Installs a SIGINT handler via tokio on a throwaway runtime, keeping
/// the session loop itself fully synchronous.
fn ctrlc_handler(on_interrupt: impl FnOnce() + Send + 'static) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
        {
            Ok(runtime) => runtime,
            Err(_) => return,
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            on_interrupt();
        }
    });
}
