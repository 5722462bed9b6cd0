//! PathNet - shortest paths as a network service
//!
//! A client uploads a weighted graph and asks for shortest paths; the server
//! keeps one graph per client session. Works over TCP or over UDP with
//! acknowledgements and retransmission.

mod config;
mod console;
mod dispatch;
mod graph;
mod network;
mod protocol;
mod session;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use console::Console;
use network::{Client, NetworkConfig as NetConfig, Server, ServerEvent, Transport};

/// PathNet - shortest-path queries over TCP or UDP
#[derive(Parser)]
#[command(name = "pathnet")]
#[command(author = "PathNet Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Upload graphs and query shortest paths over TCP or UDP", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the graph server
    Server {
        /// Transport to serve
        #[arg(short, long, value_enum)]
        transport: Option<Transport>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(short, long)]
        bind: Option<IpAddr>,
    },

    /// Run the interactive client
    Client {
        /// Server host name or address
        #[arg(short, long, default_value = "127.0.0.1")]
        server: String,

        /// Transport to use
        #[arg(short, long, value_enum)]
        transport: Option<Transport>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::load_default()?
    };

    // Initialize logging; RUST_LOG wins over the flag and the config file
    let env_directive = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = EnvFilter::new(log_directive(
        env_directive.as_deref(),
        cli.verbose,
        &config.general.log_level,
    ));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Server {
            transport,
            port,
            bind,
        } => {
            run_server(config, transport, port, bind).await?;
        }
        Commands::Client {
            server,
            transport,
            port,
        } => {
            run_client(config, server, transport, port).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Pick the log filter directive: environment, then `--verbose`, then config
fn log_directive<'a>(env: Option<&'a str>, verbose: bool, configured: &'a str) -> &'a str {
    match env {
        Some(directive) if !directive.trim().is_empty() => directive,
        _ if verbose => "debug",
        _ => configured,
    }
}

/// Run the server until Ctrl+C
async fn run_server(
    config: Config,
    transport: Option<Transport>,
    port: Option<u16>,
    bind: Option<IpAddr>,
) -> anyhow::Result<()> {
    let mut bind_addr = config.bind_addr()?;
    if let Some(ip) = bind {
        bind_addr.set_ip(ip);
    }
    if let Some(port) = port {
        bind_addr.set_port(port);
    }
    let transport = transport.unwrap_or(config.network.transport);

    let net_config = NetConfig::new(bind_addr, transport)
        .with_reliability(config.reliability())
        .with_udp_workers(config.server.udp_workers);
    let mut server = Server::new(net_config);

    let mut event_rx = server
        .take_event_receiver()
        .context("server event channel already taken")?;

    let local_addr = server.start().await?;

    println!("PathNet server listening on {} ({})", local_addr, transport);
    println!("Press Ctrl+C to stop.");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::SessionOpened { key, peer } => {
                        tracing::info!("Session {} opened by {}", key, peer);
                    }
                    ServerEvent::SessionClosed { key, reason } => {
                        tracing::info!("Session {} closed: {}", key, reason);
                    }
                    ServerEvent::RequestHandled { key, command, status } => {
                        tracing::debug!("{}: {} -> {:?}", key, command, status);
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    ServerEvent::Started { .. } | ServerEvent::Stopped => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}

/// Run the interactive client on stdin/stdout
async fn run_client(
    config: Config,
    server: String,
    transport: Option<Transport>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let transport = transport.unwrap_or(config.network.transport);
    let port = port.unwrap_or(config.network.port);

    let server_addr: SocketAddr = network::resolve_host(&server, port)
        .await
        .with_context(|| format!("resolving {}", server))?;

    let net_config = NetConfig::new(server_addr, transport)
        .with_reliability(config.reliability())
        .with_connect_timeout(config.connect_timeout());
    let mut client = Client::new(net_config);
    client.connect(server_addr).await?;

    println!("Connected to {} over {}. Type help for commands.", server_addr, transport);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut console = Console::new(client, stdin, std::io::stdout());

    tokio::select! {
        result = console.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted.");
        }
    }

    tracing::info!("Client finished");
    Ok(())
}
