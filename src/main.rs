use anyhow::Result;
use btchat::config::{LinkConfig, TransportMode};
use btchat::connection::{ConnectionManager, LinkEvent, LinkHandle};
use btchat::console::{self, ConsoleCommand};
use btchat::shared::{LinkError, PeerId, ServiceId};
use btchat::transport::{RfcommTransport, TcpSimTransport, Transport};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "btchat", version, about = "Point-to-point chat over Bluetooth RFCOMM")]
struct Cli {
    /// Use the TCP simulation transport instead of Bluetooth
    #[arg(long = "tcp-sim")]
    tcp_sim: bool,

    /// Listen address for the TCP simulation transport
    #[arg(long = "listen-addr")]
    listen_addr: Option<String>,

    /// Bluetooth adapter to use (default adapter when unset)
    #[arg(long)]
    adapter: Option<String>,

    /// RFCOMM channel the service is bound to
    #[arg(long)]
    channel: Option<u8>,

    /// Service identifier shared with the peer
    #[arg(long)]
    service: Option<ServiceId>,

    /// Do not listen for inbound connections at startup
    #[arg(long = "no-listen")]
    no_listen: bool,

    /// Peer to dial at startup (Bluetooth address, or host:port with --tcp-sim)
    #[arg(long)]
    connect: Option<PeerId>,
}

impl Cli {
    fn link_config(&self) -> LinkConfig {
        let mut config = LinkConfig::default();
        if let Some(service) = self.service {
            config.service = service;
        }
        if self.tcp_sim {
            config.mode = TransportMode::TcpSimulation;
        }
        if let Some(addr) = &self.listen_addr {
            config.tcp.listen_address = addr.clone();
        }
        if let Some(adapter) = &self.adapter {
            config.rfcomm.adapter = Some(adapter.clone());
        }
        if let Some(channel) = self.channel {
            config.rfcomm.channels.insert(config.service, channel);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = cli.link_config();

    info!("btchat starting");
    info!("  Service: {} ({})", config.service, config.service_name);

    match config.mode {
        TransportMode::Rfcomm => {
            let transport = RfcommTransport::new(config.rfcomm.clone()).await?;
            run(transport, config, &cli).await
        }
        TransportMode::TcpSimulation => {
            let transport = TcpSimTransport::new(config.tcp.clone());
            run(transport, config, &cli).await
        }
    }
}

async fn run<T: Transport>(transport: T, config: LinkConfig, cli: &Cli) -> Result<()> {
    let service = config.service;
    let mut link = ConnectionManager::new(transport, config);
    let handle = link.handle();

    if !cli.no_listen {
        tolerate_listen_setup(handle.start_listening(service).await)?;
    }
    if let Some(peer) = cli.connect.clone() {
        handle.start_connecting(peer, service).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Main event loop
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&line, &handle, service).await {
                        break;
                    }
                }
                None => break,
            },
            event = link.recv() => match event {
                Some(event) => print_event(&event),
                None => {
                    error!("Link manager closed");
                    break;
                }
            },
        }
    }

    handle.stop().await?;
    Ok(())
}

/// A listen setup failure is surfaced as a ListenFailed event and `/listen`
/// retries it; anything else is fatal
fn tolerate_listen_setup(result: Result<(), LinkError>) -> Result<(), LinkError> {
    match result {
        Err(LinkError::ListenSetup { .. }) => Ok(()),
        other => other,
    }
}

/// Handle one console line; returns false when the user asked to quit
async fn handle_line(line: &str, handle: &LinkHandle, service: ServiceId) -> bool {
    let command = match console::parse_line(line) {
        Ok(command) => command,
        Err(e) => {
            warn!("{}", e);
            return true;
        }
    };

    let result = match command {
        ConsoleCommand::Listen => handle.start_listening(service).await,
        ConsoleCommand::Connect(peer) => handle.start_connecting(peer, service).await,
        ConsoleCommand::Stop => handle.stop().await,
        ConsoleCommand::State => {
            match handle.peer().await {
                Some(peer) => println!("* {} to {}", handle.state().await, peer),
                None => println!("* {}", handle.state().await),
            }
            Ok(())
        }
        ConsoleCommand::Send(text) => handle.write(text.as_bytes()).await,
        ConsoleCommand::Empty => Ok(()),
        ConsoleCommand::Quit => return false,
    };

    if let Err(e) = result {
        warn!("{}", e);
    }
    true
}

fn print_event(event: &LinkEvent) {
    match event {
        LinkEvent::StateChanged { from, to } => info!("State: {} -> {}", from, to),
        LinkEvent::Connected { peer, role } => println!("* Connected to {} ({})", peer, role),
        LinkEvent::Disconnected { peer, reason } => {
            println!("* Disconnected from {}: {}", peer, reason)
        }
        LinkEvent::Received { peer, data } => {
            println!("{}> {}", peer, String::from_utf8_lossy(data))
        }
        LinkEvent::WriteFailed { reason } => warn!("Write failed: {}", reason),
        LinkEvent::ListenFailed { reason } => warn!("Listen failed: {}", reason),
        LinkEvent::ConnectFailed { peer, reason } => {
            warn!("Connect to {} failed: {}", peer, reason)
        }
    }
}
